//! # Sale Finalization Transaction
//!
//! The commit path. The backing store guarantees nothing across documents,
//! so the commit is a compensating-write protocol driven by a durable
//! intent record (idempotency key = sale id):
//!
//! ```text
//!   preconditions ──► authorize payments ──► intent (pending)
//!        │
//!        ▼
//!   per line item: fresh read ──► conditional decrement ──► marker
//!        │                │ conflict: bounded retry
//!        │                └ short: restock markers, intent aborted
//!        ▼
//!   intent (applied) ──► sale / service-order / payment documents
//!        │
//!        ▼
//!   intent (completed)
//! ```
//!
//! A crash between steps leaves the intent for the reconciliation pass
//! (see [`crate::recovery`]), which completes applied intents and reverses
//! pending ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use optica_core::{
    CollectionSnapshot, CoreError, PaymentRecord, Sale, SaleLineSnapshot, SaleStatus, ServiceOrder,
};
use optica_store::{
    CommitBundle, DecrementOutcome, IntentState, InventoryStore, SaleIntent, SaleStore, StoreError,
};

use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::{ClientDirectory, PaymentGateway, PaymentProcessor};
use crate::session::{CheckoutSession, FinalizeBlocker};

// =============================================================================
// Configuration
// =============================================================================

/// Finalization engine configuration.
#[derive(Debug, Clone)]
pub struct FinalizeConfig {
    /// Conditional-decrement retries per product before the conflict
    /// surfaces as insufficient stock.
    pub max_stock_retries: u32,

    /// Independent timeout for each payment method's authorization.
    pub authorization_timeout: Duration,

    /// Age after which a non-terminal intent is considered crashed and
    /// eligible for reconciliation.
    pub intent_stale_after: chrono::Duration,

    /// Age after which terminal intents are purged.
    pub intent_retention: chrono::Duration,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        FinalizeConfig {
            max_stock_retries: 3,
            authorization_timeout: Duration::from_secs(10),
            intent_stale_after: chrono::Duration::minutes(5),
            intent_retention: chrono::Duration::days(7),
        }
    }
}

impl FinalizeConfig {
    pub fn max_stock_retries(mut self, retries: u32) -> Self {
        self.max_stock_retries = retries;
        self
    }

    pub fn authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    pub fn intent_stale_after(mut self, age: chrono::Duration) -> Self {
        self.intent_stale_after = age;
        self
    }

    pub fn intent_retention(mut self, age: chrono::Duration) -> Self {
        self.intent_retention = age;
        self
    }
}

// =============================================================================
// Finalizer
// =============================================================================

/// Executes the finalization transaction against the shared stores.
#[derive(Clone)]
pub struct SaleFinalizer {
    inventory: Arc<dyn InventoryStore>,
    sales: Arc<dyn SaleStore>,
    processor: PaymentProcessor,
    config: FinalizeConfig,
}

impl SaleFinalizer {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        sales: Arc<dyn SaleStore>,
        gateway: Arc<dyn PaymentGateway>,
        directory: Arc<dyn ClientDirectory>,
        config: FinalizeConfig,
    ) -> Self {
        let processor = PaymentProcessor::new(gateway, directory, config.authorization_timeout);
        SaleFinalizer {
            inventory,
            sales,
            processor,
            config,
        }
    }

    pub fn config(&self) -> &FinalizeConfig {
        &self.config
    }

    pub(crate) fn stores(&self) -> (Arc<dyn InventoryStore>, Arc<dyn SaleStore>) {
        (self.inventory.clone(), self.sales.clone())
    }

    /// Finalizes the session's sale. On success the sale is durable, every
    /// line item's inventory is decremented exactly once, and the session's
    /// collections/payments are frozen into the returned document.
    ///
    /// Idempotent per session: finalizing a session whose sale already
    /// committed returns the stored sale without touching inventory again.
    pub async fn finalize(&self, session: &mut CheckoutSession) -> CheckoutResult<Sale> {
        let sale_id = session.id().to_string();

        // A previous attempt under this id decides what happens first.
        if let Some(intent) = self.sales.get_intent(&sale_id).await? {
            match intent.state {
                IntentState::Completed => {
                    debug!(sale_id = %sale_id, "finalize retry on completed sale");
                    return match self.sales.get_sale(&sale_id).await? {
                        Some(sale) => Ok(sale),
                        None => Ok(intent.bundle.sale),
                    };
                }
                IntentState::Applied => {
                    // decrements are done; finish the document writes
                    info!(sale_id = %sale_id, "resuming applied intent");
                    write_bundle_documents(self.sales.as_ref(), &intent.bundle).await?;
                    self.try_transition(&sale_id, IntentState::Applied, IntentState::Completed)
                        .await;
                    return Ok(intent.bundle.sale);
                }
                IntentState::Pending => {
                    // crashed before all decrements applied; reverse first
                    warn!(sale_id = %sale_id, "reversing pending intent before retry");
                    self.reverse_intent(&intent).await?;
                }
                IntentState::Aborted => {}
            }
        }

        // Preconditions, short-circuiting in order.
        for blocker in session.readiness() {
            match blocker {
                FinalizeBlocker::EmptyCart => return Err(CoreError::EmptyCart.into()),
                FinalizeBlocker::IncompleteServiceOrder { collection_id } => {
                    return Err(CoreError::IncompleteServiceOrder { collection_id }.into())
                }
                FinalizeBlocker::OverAllocation { .. } => {
                    // which entry is ambiguous after a re-cap; report the
                    // first funded one
                    let index = session
                        .plan()
                        .entries()
                        .iter()
                        .position(|e| e.amount_cents > 0)
                        .unwrap_or(0);
                    return Err(CoreError::OverAllocation { index }.into());
                }
                FinalizeBlocker::UnallocatedBalance { remaining_cents } => {
                    return Err(CoreError::UnallocatedBalance { remaining_cents }.into())
                }
                // surfaced per entry by the payment processor below
                FinalizeBlocker::InvalidPaymentEntry { .. } => {}
            }
        }

        // Authorize every payment method (independently, each under its own
        // timeout) before any inventory moves.
        let client_id = session.client_id().map(str::to_string);
        self.processor
            .process_plan(&sale_id, session.plan_mut(), client_id.as_deref())
            .await?;

        // Freeze the commit bundle.
        let bundle = build_bundle(session)?;
        let now = Utc::now();
        let intent = SaleIntent {
            sale_id: sale_id.clone(),
            state: IntentState::Pending,
            bundle: bundle.clone(),
            created_at: now,
            updated_at: now,
        };
        self.sales
            .create_intent(&intent)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation { .. } => CheckoutError::PersistenceFailure {
                    sale_id: sale_id.clone(),
                    detail: "another finalize is in flight for this sale".to_string(),
                },
                other => other.into(),
            })?;

        // Check-and-decrement per product, serialized against concurrent
        // finalizations by the version counter.
        if let Err(err) = self.apply_decrements(&bundle).await {
            self.rollback_pending(&sale_id).await?;
            return Err(err);
        }

        self.sales
            .set_intent_state(&sale_id, IntentState::Pending, IntentState::Applied)
            .await
            .map_err(|e| CheckoutError::PersistenceFailure {
                sale_id: sale_id.clone(),
                detail: e.to_string(),
            })?;

        // Document writes. Failure past this point leaves an applied intent
        // that reconciliation (or a finalize retry) completes.
        if let Err(e) = write_bundle_documents(self.sales.as_ref(), &bundle).await {
            return Err(CheckoutError::PersistenceFailure {
                sale_id,
                detail: e.to_string(),
            });
        }

        self.try_transition(&sale_id, IntentState::Applied, IntentState::Completed)
            .await;

        info!(
            sale_id = %sale_id,
            total = %bundle.sale.total_cents,
            collections = bundle.sale.collections.len(),
            payments = bundle.payments.len(),
            "sale finalized"
        );
        Ok(bundle.sale)
    }

    /// Voids a finalized sale and restocks its line items.
    /// `Voided` is terminal; voiding twice fails.
    pub async fn void(&self, sale_id: &str) -> CheckoutResult<Sale> {
        let sale = self
            .sales
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Sale", sale_id))?;

        if sale.status != SaleStatus::Finalized {
            return Err(CoreError::InvalidSaleStatus {
                sale_id: sale_id.to_string(),
                current_status: sale.status.as_str().to_string(),
            }
            .into());
        }

        self.sales
            .update_sale_status(sale_id, SaleStatus::Finalized, SaleStatus::Voided)
            .await?;

        for (product_id, qty) in sale.product_quantities() {
            if let Err(e) = self
                .inventory
                .restock(&sale.store_id, &product_id, qty)
                .await
            {
                return Err(CheckoutError::PersistenceFailure {
                    sale_id: sale_id.to_string(),
                    detail: format!("void restock failed for {product_id}: {e}"),
                });
            }
        }

        info!(sale_id = %sale_id, "sale voided and restocked");
        self.sales
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Sale", sale_id).into())
    }

    /// Fresh read then conditional decrement for every product, with bounded
    /// retry on version conflicts. Marks each applied decrement so a reversal
    /// restocks exactly what was taken.
    async fn apply_decrements(&self, bundle: &CommitBundle) -> CheckoutResult<()> {
        let sale = &bundle.sale;
        for (product_id, requested) in sale.product_quantities() {
            let mut attempts = 0u32;
            loop {
                let level = match self
                    .inventory
                    .read_quantity(&sale.store_id, &product_id)
                    .await
                {
                    Ok(level) => level,
                    Err(StoreError::NotFound { .. }) => {
                        return Err(CoreError::InsufficientStock {
                            product_id,
                            available: 0,
                            requested,
                        }
                        .into())
                    }
                    Err(e) => return Err(e.into()),
                };

                if level.quantity < requested {
                    return Err(CoreError::InsufficientStock {
                        product_id,
                        available: level.quantity,
                        requested,
                    }
                    .into());
                }

                match self
                    .inventory
                    .conditional_decrement(&sale.store_id, &product_id, requested, level.version)
                    .await?
                {
                    DecrementOutcome::Applied => {
                        self.sales
                            .mark_decrement_applied(&sale.id, &product_id, requested)
                            .await?;
                        break;
                    }
                    DecrementOutcome::Conflict => {
                        attempts += 1;
                        debug!(
                            sale_id = %sale.id,
                            product_id = %product_id,
                            attempts = %attempts,
                            "stock conflict, retrying"
                        );
                        if attempts > self.config.max_stock_retries {
                            // still contended after bounded retries; the
                            // caller sees it as stock that is no longer there
                            return Err(CoreError::InsufficientStock {
                                product_id,
                                available: level.quantity,
                                requested,
                            }
                            .into());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Restocks every marked decrement of a pending intent and aborts it.
    async fn rollback_pending(&self, sale_id: &str) -> CheckoutResult<()> {
        let intent = self
            .sales
            .get_intent(sale_id)
            .await?
            .ok_or_else(|| StoreError::not_found("SaleIntent", sale_id))?;
        self.reverse_intent(&intent).await
    }

    pub(crate) async fn reverse_intent(&self, intent: &SaleIntent) -> CheckoutResult<()> {
        reverse_intent(self.inventory.as_ref(), self.sales.as_ref(), intent).await
    }

    /// Best-effort terminal transition. Decrements and documents are already
    /// durable here; losing the race (or the write) only delays the flip
    /// until reconciliation, so the commit still reports success.
    async fn try_transition(&self, sale_id: &str, from: IntentState, to: IntentState) {
        if let Err(e) = self.sales.set_intent_state(sale_id, from, to).await {
            warn!(sale_id = %sale_id, error = %e, "intent transition deferred to reconciliation");
        }
    }
}

// =============================================================================
// Bundle Assembly
// =============================================================================

/// Freezes the session into the documents the commit will write.
fn build_bundle(session: &CheckoutSession) -> CheckoutResult<CommitBundle> {
    let sale_id = session.id().to_string();
    let now = Utc::now();

    let service_orders: Vec<ServiceOrder> =
        session.resolver().build_orders(session.cart(), &sale_id)?;

    let collections: Vec<CollectionSnapshot> = session
        .cart()
        .collections
        .iter()
        .map(|collection| CollectionSnapshot {
            collection_id: collection.id.clone(),
            label: collection.label.clone(),
            lines: collection
                .items
                .iter()
                .map(|item| SaleLineSnapshot {
                    product_id: item.product_id.clone(),
                    description: item.description.clone(),
                    unit_price_cents: item.unit_price_cents,
                    quantity: item.quantity,
                    line_total_cents: item.line_total().cents(),
                    category: item.category,
                })
                .collect(),
            subtotal_cents: collection.subtotal().cents(),
            service_order_id: service_orders
                .iter()
                .find(|o| o.collection_id == collection.id)
                .map(|o| o.id.clone()),
        })
        .collect();

    let payments: Vec<PaymentRecord> = session
        .plan()
        .entries()
        .iter()
        .filter(|entry| entry.amount_cents > 0)
        .map(|entry| PaymentRecord {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.clone(),
            amount_cents: entry.amount_cents,
            details: entry.details.clone(),
            confirmation_id: entry.confirmation_id.clone(),
            change_cents: entry.change().map(|m| m.cents()),
            created_at: now,
        })
        .collect();

    let sale = Sale {
        id: sale_id,
        client_id: session.client_id().map(str::to_string),
        store_id: session.store_id().to_string(),
        status: SaleStatus::Finalized,
        collections,
        discount: session.discount().copied(),
        subtotal_cents: session.subtotal().cents(),
        discount_cents: session.discount_amount().cents(),
        total_cents: session.payable_total().cents(),
        created_at: now,
        finalized_at: Some(now),
    };

    Ok(CommitBundle {
        sale,
        service_orders,
        payments,
    })
}

/// Restocks every marked decrement of a pending intent and aborts it.
/// Used by the commit path and by reconciliation.
pub(crate) async fn reverse_intent(
    inventory: &dyn InventoryStore,
    sales: &dyn SaleStore,
    intent: &SaleIntent,
) -> CheckoutResult<()> {
    let store_id = &intent.bundle.sale.store_id;
    for marker in sales.applied_decrements(&intent.sale_id).await? {
        if let Err(e) = inventory
            .restock(store_id, &marker.product_id, marker.quantity)
            .await
        {
            // leave the intent pending; reconciliation retries the reversal
            return Err(CheckoutError::PersistenceFailure {
                sale_id: intent.sale_id.clone(),
                detail: format!("compensation restock failed: {e}"),
            });
        }
    }
    sales
        .set_intent_state(&intent.sale_id, IntentState::Pending, IntentState::Aborted)
        .await?;
    debug!(sale_id = %intent.sale_id, "intent reversed");
    Ok(())
}

/// Writes the bundle's documents, treating already-written ones as done so
/// commit resumption and reconciliation stay idempotent.
pub(crate) async fn write_bundle_documents(
    sales: &dyn SaleStore,
    bundle: &CommitBundle,
) -> Result<(), StoreError> {
    match sales.create_sale(&bundle.sale).await {
        Ok(()) | Err(StoreError::UniqueViolation { .. }) => {}
        Err(e) => return Err(e),
    }
    for order in &bundle.service_orders {
        match sales.create_service_order(order).await {
            Ok(()) | Err(StoreError::UniqueViolation { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    for payment in &bundle.payments {
        match sales.create_payment_record(payment).await {
            Ok(()) | Err(StoreError::UniqueViolation { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
