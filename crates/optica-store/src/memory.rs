//! # In-Memory Store
//!
//! Mutex-guarded implementation of the store traits, semantically identical
//! to the SQLite repositories: versioned inventory with conditional
//! decrements, append-only documents, guarded intent transitions.
//!
//! Used by checkout tests, including the concurrent-oversell race, where an
//! isolated per-test store with cheap seeding matters more than durability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use optica_core::{PaymentRecord, Sale, SaleStatus, ServiceOrder};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    AppliedDecrement, DecrementOutcome, IntentState, InventoryStore, SaleIntent, SaleStore,
    StockLevel,
};

#[derive(Debug, Default)]
struct Inner {
    inventory: HashMap<(String, String), StockLevel>,
    sales: HashMap<String, Sale>,
    service_orders: Vec<ServiceOrder>,
    payments: Vec<PaymentRecord>,
    intents: HashMap<String, SaleIntent>,
    decrements: HashMap<String, Vec<AppliedDecrement>>,
}

/// In-process store holding everything behind one mutex.
///
/// The lock is held only across plain map operations, never across an
/// await point.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stock record (version 0).
    pub fn seed_inventory(&self, store_id: &str, product_id: &str, quantity: i64) {
        let mut inner = self.lock();
        inner.inventory.insert(
            (store_id.to_string(), product_id.to_string()),
            StockLevel {
                quantity,
                version: 0,
            },
        );
    }

    /// Test helper: current quantity on hand, if the record exists.
    pub fn quantity_on_hand(&self, store_id: &str, product_id: &str) -> Option<i64> {
        self.lock()
            .inventory
            .get(&(store_id.to_string(), product_id.to_string()))
            .map(|level| level.quantity)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock means a test already panicked; propagate
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn read_quantity(&self, store_id: &str, product_id: &str) -> StoreResult<StockLevel> {
        self.lock()
            .inventory
            .get(&(store_id.to_string(), product_id.to_string()))
            .copied()
            .ok_or_else(|| StoreError::not_found("InventoryRecord", product_id))
    }

    async fn conditional_decrement(
        &self,
        store_id: &str,
        product_id: &str,
        qty: i64,
        expected_version: i64,
    ) -> StoreResult<DecrementOutcome> {
        let mut inner = self.lock();
        let level = inner
            .inventory
            .get_mut(&(store_id.to_string(), product_id.to_string()))
            .ok_or_else(|| StoreError::not_found("InventoryRecord", product_id))?;

        if level.version != expected_version || level.quantity < qty {
            return Ok(DecrementOutcome::Conflict);
        }
        level.quantity -= qty;
        level.version += 1;
        Ok(DecrementOutcome::Applied)
    }

    async fn restock(&self, store_id: &str, product_id: &str, qty: i64) -> StoreResult<()> {
        let mut inner = self.lock();
        let level = inner
            .inventory
            .get_mut(&(store_id.to_string(), product_id.to_string()))
            .ok_or_else(|| StoreError::not_found("InventoryRecord", product_id))?;
        level.quantity += qty;
        level.version += 1;
        Ok(())
    }
}

#[async_trait]
impl SaleStore for MemoryStore {
    async fn create_intent(&self, intent: &SaleIntent) -> StoreResult<()> {
        let mut inner = self.lock();
        let existing_state = inner.intents.get(&intent.sale_id).map(|i| i.state);
        match existing_state {
            Some(state) if state != IntentState::Aborted => {
                return Err(StoreError::duplicate(
                    "sale_intents.sale_id",
                    &intent.sale_id,
                ));
            }
            Some(_) => {
                // replaced aborted attempt must not leak its markers
                inner.decrements.remove(&intent.sale_id);
            }
            None => {}
        }
        let mut stored = intent.clone();
        stored.state = IntentState::Pending;
        inner.intents.insert(intent.sale_id.clone(), stored);
        Ok(())
    }

    async fn get_intent(&self, sale_id: &str) -> StoreResult<Option<SaleIntent>> {
        Ok(self.lock().intents.get(sale_id).cloned())
    }

    async fn set_intent_state(
        &self,
        sale_id: &str,
        from: IntentState,
        to: IntentState,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        match inner.intents.get_mut(sale_id) {
            Some(intent) if intent.state == from => {
                intent.state = to;
                intent.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::not_found(
                format!("SaleIntent ({})", from.as_str()),
                sale_id,
            )),
        }
    }

    async fn mark_decrement_applied(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let markers = inner.decrements.entry(sale_id.to_string()).or_default();
        if let Some(existing) = markers.iter_mut().find(|m| m.product_id == product_id) {
            existing.quantity = quantity;
        } else {
            markers.push(AppliedDecrement {
                product_id: product_id.to_string(),
                quantity,
            });
        }
        Ok(())
    }

    async fn applied_decrements(&self, sale_id: &str) -> StoreResult<Vec<AppliedDecrement>> {
        Ok(self
            .lock()
            .decrements
            .get(sale_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn stale_intents(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<SaleIntent>> {
        let inner = self.lock();
        let mut stale: Vec<SaleIntent> = inner
            .intents
            .values()
            .filter(|i| !i.state.is_terminal() && i.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|i| i.updated_at);
        Ok(stale)
    }

    async fn purge_terminal_intents(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner
            .intents
            .values()
            .filter(|i| i.state.is_terminal() && i.updated_at < older_than)
            .map(|i| i.sale_id.clone())
            .collect();
        for sale_id in &doomed {
            inner.intents.remove(sale_id);
            inner.decrements.remove(sale_id);
        }
        Ok(doomed.len() as u64)
    }

    async fn create_sale(&self, sale: &Sale) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.sales.contains_key(&sale.id) {
            return Err(StoreError::duplicate("sale_documents.id", &sale.id));
        }
        inner.sales.insert(sale.id.clone(), sale.clone());
        Ok(())
    }

    async fn get_sale(&self, sale_id: &str) -> StoreResult<Option<Sale>> {
        Ok(self.lock().sales.get(sale_id).cloned())
    }

    async fn update_sale_status(
        &self,
        sale_id: &str,
        from: SaleStatus,
        to: SaleStatus,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        match inner.sales.get_mut(sale_id) {
            Some(sale) if sale.status == from => {
                sale.status = to;
                Ok(())
            }
            _ => Err(StoreError::not_found(
                format!("Sale ({})", from.as_str()),
                sale_id,
            )),
        }
    }

    async fn create_service_order(&self, order: &ServiceOrder) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.service_orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::duplicate("service_order_documents.id", &order.id));
        }
        inner.service_orders.push(order.clone());
        Ok(())
    }

    async fn create_payment_record(&self, record: &PaymentRecord) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.payments.iter().any(|p| p.id == record.id) {
            return Err(StoreError::duplicate("payment_documents.id", &record.id));
        }
        inner.payments.push(record.clone());
        Ok(())
    }

    async fn service_orders_for_sale(&self, sale_id: &str) -> StoreResult<Vec<ServiceOrder>> {
        Ok(self
            .lock()
            .service_orders
            .iter()
            .filter(|o| o.sale_id == sale_id)
            .cloned()
            .collect())
    }

    async fn payment_records_for_sale(&self, sale_id: &str) -> StoreResult<Vec<PaymentRecord>> {
        Ok(self
            .lock()
            .payments
            .iter()
            .filter(|p| p.sale_id == sale_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
