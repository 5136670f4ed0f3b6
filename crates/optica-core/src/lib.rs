//! # optica-core: Pure Business Logic for Optica POS
//!
//! The heart of the sale finalization engine: cart aggregation, discount
//! math, service-order gating and payment allocation as pure, deterministic
//! code with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//!   Checkout UI
//!        │
//!   optica-checkout   session object, gateways, finalization transaction
//!        │
//!   optica-core (THIS CRATE)
//!        │  cart · money · discount · allocation · service_order
//!        │  NO I/O, NO DATABASE, NO NETWORK
//!        │
//!   optica-store      document store access (SQLite / in-memory)
//! ```
//!
//! ## Design Principles
//!
//! 1. Every function here is deterministic: same input, same output
//! 2. All monetary values are integer centavos (`Money`), never floats
//! 3. All errors are typed enum variants, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod cart;
pub mod discount;
pub mod error;
pub mod money;
pub mod service_order;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use allocation::{entry_issues, AllocationIssue, PaymentAllocation, PaymentPlan};
pub use cart::{Cart, CartItem, Collection};
pub use discount::{payable_total, Discount};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use service_order::{IntakeReport, IntakeRequest, ServiceOrderResolver};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items allowed in a single cart, across all collections.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line item.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum installment count accepted for credit methods.
pub const MAX_INSTALLMENTS: i64 = 48;

/// Settle tolerance in centavos: the allocation engine treats a remaining
/// balance at or below this as fully allocated, absorbing rounding on the
/// discounted total.
pub const SETTLE_TOLERANCE_CENTS: i64 = 1;
