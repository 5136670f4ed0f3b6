//! # Checkout Session
//!
//! The explicit session object the checkout UI drives. Owns the cart, the
//! discount, the service-order resolver and the payment plan, and keeps
//! them consistent: every cart or discount mutation re-evaluates the
//! resolver and re-caps the payment plan against the new payable total.
//!
//! Everything here is in-memory and session-scoped. Abandoning the session
//! at any point before finalize has no side effects; the session id doubles
//! as the sale id and idempotency key once finalize begins.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use optica_core::{
    payable_total, Cart, CartItem, CoreResult, Discount, IntakeReport, IntakeRequest, Money,
    PaymentDetails, PaymentPlan, PaymentMethod, ServiceOrderResolver, ServiceOrderStatus,
};

// =============================================================================
// Finalize Readiness
// =============================================================================

/// One unmet finalize precondition, in the order they are checked. The UI
/// disables the finalize action while any blocker exists and shows which.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FinalizeBlocker {
    EmptyCart,
    IncompleteServiceOrder { collection_id: String },
    OverAllocation { excess_cents: i64 },
    UnallocatedBalance { remaining_cents: i64 },
    InvalidPaymentEntry { index: usize, message: String },
}

// =============================================================================
// Checkout Session
// =============================================================================

/// One cashier's in-flight checkout.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Session id; becomes the sale id (and idempotency key) at finalize.
    id: String,
    store_id: String,
    client_id: Option<String>,
    cart: Cart,
    discount: Option<Discount>,
    resolver: ServiceOrderResolver,
    plan: PaymentPlan,
}

impl CheckoutSession {
    pub fn new(store_id: impl Into<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        debug!(session_id = %id, "checkout session started");
        CheckoutSession {
            id,
            store_id: store_id.into(),
            client_id: None,
            cart: Cart::new(),
            discount: None,
            resolver: ServiceOrderResolver::new(),
            plan: PaymentPlan::new(Money::zero()),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    #[inline]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn set_client(&mut self, client_id: impl Into<String>) {
        self.client_id = Some(client_id.into());
    }

    // -------------------------------------------------------------------------
    // Cart
    // -------------------------------------------------------------------------

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn add_collection(&mut self, label: impl Into<String>) -> String {
        let id = self.cart.add_collection(label);
        self.refresh();
        id
    }

    pub fn remove_collection(&mut self, collection_id: &str) -> CoreResult<()> {
        self.cart.remove_collection(collection_id)?;
        self.refresh();
        Ok(())
    }

    pub fn add_item(&mut self, collection_id: &str, item: CartItem) -> CoreResult<()> {
        self.cart.add_item(collection_id, item)?;
        self.refresh();
        Ok(())
    }

    pub fn remove_item(&mut self, collection_id: &str, item_id: &str) -> CoreResult<()> {
        self.cart.remove_item(collection_id, item_id)?;
        self.refresh();
        Ok(())
    }

    pub fn set_quantity(
        &mut self,
        collection_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> CoreResult<()> {
        self.cart.set_quantity(collection_id, item_id, quantity)?;
        self.refresh();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Discount / Totals
    // -------------------------------------------------------------------------

    pub fn set_discount(&mut self, discount: Option<Discount>) {
        self.discount = discount;
        self.refresh();
    }

    pub fn discount(&self) -> Option<&Discount> {
        self.discount.as_ref()
    }

    pub fn subtotal(&self) -> Money {
        self.cart.subtotal()
    }

    pub fn discount_amount(&self) -> Money {
        match &self.discount {
            Some(d) => d.computed_amount(self.subtotal()),
            None => Money::zero(),
        }
    }

    pub fn payable_total(&self) -> Money {
        payable_total(self.subtotal(), self.discount.as_ref())
    }

    // -------------------------------------------------------------------------
    // Service Orders
    // -------------------------------------------------------------------------

    pub fn resolver(&self) -> &ServiceOrderResolver {
        &self.resolver
    }

    pub fn service_order_status(&self, collection_id: &str) -> ServiceOrderStatus {
        self.resolver.status(collection_id)
    }

    /// Requests to push to the intake form, one per pending collection.
    pub fn intake_requests(&self) -> Vec<IntakeRequest> {
        self.resolver.intake_requests()
    }

    /// Records an intake form report and returns the collection's status.
    pub fn record_intake(&mut self, report: IntakeReport) -> CoreResult<ServiceOrderStatus> {
        self.resolver.record_intake(&self.cart, report)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    pub fn plan(&self) -> &PaymentPlan {
        &self.plan
    }

    /// Mutable plan access for the finalization engine (confirmation
    /// recording). Amounts still only move through the plan's own API.
    pub fn plan_mut(&mut self) -> &mut PaymentPlan {
        &mut self.plan
    }

    pub fn add_payment_method(&mut self, method: PaymentMethod) -> usize {
        self.plan.add_method(method)
    }

    pub fn set_payment_amount(&mut self, index: usize, amount: Money) -> CoreResult<()> {
        self.plan.set_amount(index, amount)
    }

    pub fn remove_payment_method(&mut self, index: usize) -> CoreResult<()> {
        self.plan.remove_method(index).map(|_| ())
    }

    pub fn payment_details_mut(&mut self, index: usize) -> CoreResult<&mut PaymentDetails> {
        self.plan.details_mut(index)
    }

    pub fn remaining_balance(&self) -> Money {
        self.plan.remaining_balance()
    }

    // -------------------------------------------------------------------------
    // Readiness
    // -------------------------------------------------------------------------

    /// Every unmet finalize precondition, in check order.
    pub fn readiness(&self) -> Vec<FinalizeBlocker> {
        let mut blockers = Vec::new();

        if self.cart.is_empty() {
            blockers.push(FinalizeBlocker::EmptyCart);
        }

        for collection in &self.cart.collections {
            if self.resolver.status(&collection.id) == ServiceOrderStatus::PendingIntake {
                blockers.push(FinalizeBlocker::IncompleteServiceOrder {
                    collection_id: collection.id.clone(),
                });
            }
        }

        let over = self.plan.over_allocated();
        if over.is_positive() {
            blockers.push(FinalizeBlocker::OverAllocation {
                excess_cents: over.cents(),
            });
        }

        if !self.plan.can_settle() && over.is_zero() {
            blockers.push(FinalizeBlocker::UnallocatedBalance {
                remaining_cents: self.plan.remaining_balance().cents(),
            });
        }

        for issue in self.plan.validate_entries() {
            blockers.push(FinalizeBlocker::InvalidPaymentEntry {
                index: issue.index,
                message: issue.message,
            });
        }

        blockers
    }

    /// True when nothing blocks finalization.
    pub fn can_finalize(&self) -> bool {
        self.readiness().is_empty()
    }

    /// Re-derives resolver state and plan cap after a cart/discount change.
    fn refresh(&mut self) {
        self.resolver.evaluate(&self.cart);
        self.plan.set_payable_total(self.payable_total());
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use optica_core::{ItemCategory, LensPrescription};

    fn frame_item(stock: i64) -> CartItem {
        CartItem::new(
            "frame-ray",
            "Acetate frame",
            Money::from_cents(60_000),
            1,
            ItemCategory::Frame,
            stock,
        )
    }

    fn lens_item(stock: i64) -> CartItem {
        CartItem::new(
            "lens-cr39",
            "CR-39 single vision pair",
            Money::from_cents(40_000),
            1,
            ItemCategory::Lens,
            stock,
        )
    }

    fn complete_prescription() -> LensPrescription {
        LensPrescription {
            client_id: Some("client-1".to_string()),
            od_sphere: Some(-1.25),
            os_sphere: Some(-1.0),
            pd_mm: Some(62.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_totals_follow_cart_and_discount() {
        let mut session = CheckoutSession::new("store-1");
        let c = session.add_collection("first pair");
        session.add_item(&c, frame_item(10)).unwrap();
        session.add_item(&c, lens_item(5)).unwrap();

        assert_eq!(session.subtotal().cents(), 100_000);
        session.set_discount(Some(Discount::percentage(10.0)));
        assert_eq!(session.discount_amount().cents(), 10_000);
        assert_eq!(session.payable_total().cents(), 90_000);
        assert_eq!(session.plan().payable_total().cents(), 90_000);
    }

    #[test]
    fn test_readiness_flows_to_empty() {
        let mut session = CheckoutSession::new("store-1");
        assert_eq!(session.readiness(), vec![FinalizeBlocker::EmptyCart]);

        let c = session.add_collection("first pair");
        session.add_item(&c, lens_item(5)).unwrap();

        // lens pending intake + whole total unallocated
        let blockers = session.readiness();
        assert!(blockers
            .iter()
            .any(|b| matches!(b, FinalizeBlocker::IncompleteServiceOrder { collection_id } if collection_id == &c)));
        assert!(blockers
            .iter()
            .any(|b| matches!(b, FinalizeBlocker::UnallocatedBalance { remaining_cents: 40_000 })));

        session
            .record_intake(IntakeReport {
                collection_id: c.clone(),
                complete: true,
                payload: complete_prescription(),
            })
            .unwrap();
        let cash = session.add_payment_method(PaymentMethod::Cash);
        session
            .set_payment_amount(cash, Money::from_cents(40_000))
            .unwrap();

        assert!(session.can_finalize());
    }

    #[test]
    fn test_cart_edit_reverts_intake_and_recaps_plan() {
        let mut session = CheckoutSession::new("store-1");
        let c = session.add_collection("first pair");
        session.add_item(&c, lens_item(5)).unwrap();
        session
            .record_intake(IntakeReport {
                collection_id: c.clone(),
                complete: true,
                payload: complete_prescription(),
            })
            .unwrap();
        let cash = session.add_payment_method(PaymentMethod::Cash);
        session
            .set_payment_amount(cash, Money::from_cents(40_000))
            .unwrap();
        assert!(session.can_finalize());

        // removing the lens item empties the collection: the allocation now
        // exceeds the (zero) payable and the plan reports it
        let item_id = session.cart().collections[0].items[0].id.clone();
        session.set_quantity(&c, &item_id, 0).unwrap();

        let blockers = session.readiness();
        assert!(blockers.contains(&FinalizeBlocker::EmptyCart));
        assert!(blockers
            .iter()
            .any(|b| matches!(b, FinalizeBlocker::OverAllocation { excess_cents: 40_000 })));
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(
            CheckoutSession::new("store-1").id(),
            CheckoutSession::new("store-1").id()
        );
    }
}
