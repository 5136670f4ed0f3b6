//! # optica-checkout: Checkout Session + Sale Finalization Engine
//!
//! The layer the checkout UI talks to. One [`session::CheckoutSession`] per
//! in-flight checkout; one [`finalize::SaleFinalizer`] per process, shared
//! across sessions, executing the commit protocol against the stores; one
//! [`recovery::Reconciler`] run at startup and while idle.
//!
//! ## Data Flow
//! ```text
//!   Cart ──► Discount ──► payable total ──► PaymentPlan
//!    │                                          │
//!    └──► ServiceOrderResolver ──canFinalize────┤
//!                                               ▼
//!                            SaleFinalizer::finalize()
//!                       intent · decrements · documents
//! ```
//!
//! ## Module Organization
//!
//! - [`session`] - the session/context object and finalize readiness
//! - [`gateway`] - payment gateway + client directory interfaces, processor
//! - [`finalize`] - the finalization transaction
//! - [`recovery`] - stale-intent reconciliation
//! - [`error`] - checkout error type

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod finalize;
pub mod gateway;
pub mod recovery;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{CheckoutError, CheckoutResult};
pub use finalize::{FinalizeConfig, SaleFinalizer};
pub use gateway::{
    Authorization, ClientDirectory, ClientRef, GatewayError, PaymentGateway, PaymentProcessor,
};
pub use recovery::{ReconcileReport, Reconciler};
pub use session::{CheckoutSession, FinalizeBlocker};
