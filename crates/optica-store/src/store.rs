//! # Store Traits
//!
//! The contracts the finalization engine holds against the backing store.
//! The hosted document store offers no multi-document transactions, so the
//! traits expose exactly what the compensating-write protocol needs:
//!
//! - versioned inventory reads and conditional decrements
//! - append-only document creation keyed by generated ids
//! - durable intent records with guarded state transitions
//!
//! Two implementations live in this crate: `SqliteStore` (see
//! [`crate::pool::Database`]) and [`crate::memory::MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use optica_core::{PaymentRecord, Sale, ServiceOrder};

use crate::error::StoreResult;

// =============================================================================
// Inventory
// =============================================================================

/// One versioned read of an inventory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: i64,
    /// Bumped by every write; conditional decrements check it.
    pub version: i64,
}

/// Result of a conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Decrement applied; the version the caller read was still current and
    /// the quantity covered the request.
    Applied,
    /// Another writer got there first (or quantity no longer covers the
    /// request). The caller must re-read and retry.
    Conflict,
}

/// Per-product, per-store quantity on hand. The one piece of shared mutable
/// state touched by concurrent checkouts.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Fresh read of quantity and version.
    async fn read_quantity(&self, store_id: &str, product_id: &str) -> StoreResult<StockLevel>;

    /// Decrements quantity by `qty` iff the record's version still equals
    /// `expected_version` and the quantity covers the request. Never goes
    /// negative.
    async fn conditional_decrement(
        &self,
        store_id: &str,
        product_id: &str,
        qty: i64,
        expected_version: i64,
    ) -> StoreResult<DecrementOutcome>;

    /// Unconditional increment. Used by compensation and by sale voiding.
    async fn restock(&self, store_id: &str, product_id: &str, qty: i64) -> StoreResult<()>;
}

// =============================================================================
// Intent Records
// =============================================================================

/// State of a sale intent record.
///
/// ```text
///   Pending ──decrements done──► Applied ──documents written──► Completed
///      │
///      └──reversed (stock restored)──► Aborted
/// ```
///
/// `Completed` and `Aborted` are terminal. Reconciliation moves stale
/// `Pending` intents to `Aborted` and stale `Applied` intents to
/// `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Pending,
    Applied,
    Completed,
    Aborted,
}

impl IntentState {
    /// Stable string form used in store columns.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IntentState::Pending => "pending",
            IntentState::Applied => "applied",
            IntentState::Completed => "completed",
            IntentState::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IntentState::Pending),
            "applied" => Some(IntentState::Applied),
            "completed" => Some(IntentState::Completed),
            "aborted" => Some(IntentState::Aborted),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, IntentState::Completed | IntentState::Aborted)
    }
}

/// Everything a commit will write, frozen before the first inventory
/// decrement. Reconciliation replays document writes from this bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBundle {
    pub sale: Sale,
    pub service_orders: Vec<ServiceOrder>,
    pub payments: Vec<PaymentRecord>,
}

/// Durable marker written before a multi-step commit begins.
/// Idempotency key = sale id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleIntent {
    pub sale_id: String,
    pub state: IntentState,
    pub bundle: CommitBundle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Marker for one inventory decrement already applied under an intent.
/// Reversal restocks exactly these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDecrement {
    pub product_id: String,
    pub quantity: i64,
}

// =============================================================================
// Sale Documents
// =============================================================================

/// Append-only persistence for sale, service-order and payment documents,
/// plus the intent records driving the commit protocol.
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Creates an intent record in `Pending` state.
    ///
    /// Fails with `UniqueViolation` when an intent for this sale id already
    /// exists in a non-aborted state. An aborted intent is replaced (its
    /// decrement markers are cleared), so a corrected checkout can retry
    /// under the same sale id.
    async fn create_intent(&self, intent: &SaleIntent) -> StoreResult<()>;

    async fn get_intent(&self, sale_id: &str) -> StoreResult<Option<SaleIntent>>;

    /// Guarded transition `from -> to`. Fails with `NotFound` when the
    /// intent is missing or not in `from`, so two workers can never both
    /// win the same transition.
    async fn set_intent_state(
        &self,
        sale_id: &str,
        from: IntentState,
        to: IntentState,
    ) -> StoreResult<()>;

    /// Records that one product's decrement was applied under an intent.
    async fn mark_decrement_applied(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> StoreResult<()>;

    async fn applied_decrements(&self, sale_id: &str) -> StoreResult<Vec<AppliedDecrement>>;

    /// Intents still in a non-terminal state whose last update is older
    /// than `older_than`. Input to the reconciliation pass.
    async fn stale_intents(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<SaleIntent>>;

    /// Deletes terminal intents (and their decrement markers) older than
    /// `older_than`. Returns how many were removed.
    async fn purge_terminal_intents(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;

    /// Writes the frozen sale document. Fails with `UniqueViolation` when
    /// the sale id already exists.
    async fn create_sale(&self, sale: &Sale) -> StoreResult<()>;

    async fn get_sale(&self, sale_id: &str) -> StoreResult<Option<Sale>>;

    /// Guarded status flip on a sale document (used by voiding).
    async fn update_sale_status(
        &self,
        sale_id: &str,
        from: optica_core::SaleStatus,
        to: optica_core::SaleStatus,
    ) -> StoreResult<()>;

    async fn create_service_order(&self, order: &ServiceOrder) -> StoreResult<()>;

    async fn create_payment_record(&self, record: &PaymentRecord) -> StoreResult<()>;

    async fn service_orders_for_sale(&self, sale_id: &str) -> StoreResult<Vec<ServiceOrder>>;

    async fn payment_records_for_sale(&self, sale_id: &str) -> StoreResult<Vec<PaymentRecord>>;
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_state_round_trip() {
        for state in [
            IntentState::Pending,
            IntentState::Applied,
            IntentState::Completed,
            IntentState::Aborted,
        ] {
            assert_eq!(IntentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(IntentState::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!IntentState::Pending.is_terminal());
        assert!(!IntentState::Applied.is_terminal());
        assert!(IntentState::Completed.is_terminal());
        assert!(IntentState::Aborted.is_terminal());
    }
}
