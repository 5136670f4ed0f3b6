//! # Error Types
//!
//! Domain-specific error types for optica-core.
//!
//! Errors are enum variants with context fields, never bare strings. Store
//! and checkout layers wrap these into their own types; see optica-store
//! and optica-checkout.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations in cart, discount, allocation and
/// service-order logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested quantity is not backed by available stock.
    ///
    /// Raised by the cart against its add-time snapshot, and by the
    /// finalization transaction against a fresh inventory read.
    #[error("insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A collection still needs its assembly intake completed.
    #[error("service order incomplete for collection {collection_id}")]
    IncompleteServiceOrder { collection_id: String },

    /// A `set_amount` call would push the allocation sum past the payable
    /// total. The caller is told which entry; nothing is clamped silently.
    #[error("allocation for payment entry {index} would exceed the payable total")]
    OverAllocation { index: usize },

    /// Allocations do not yet cover the payable total.
    #[error("unallocated balance of {remaining_cents} centavos remains")]
    UnallocatedBalance { remaining_cents: i64 },

    /// Collection id not present in the cart.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Item id not present in the collection.
    #[error("item {item_id} not found in collection {collection_id}")]
    ItemNotFound {
        collection_id: String,
        item_id: String,
    },

    /// Payment entry index out of range.
    #[error("payment entry {index} does not exist")]
    PaymentEntryNotFound { index: usize },

    /// Cart has exceeded maximum allowed items.
    #[error("cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Cart has no items to sell.
    #[error("cart is empty")]
    EmptyCart,

    /// Sale is not in a state that allows the requested operation.
    #[error("sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Payment amount is invalid.
    #[error("invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation failures, raised before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, malformed address).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
