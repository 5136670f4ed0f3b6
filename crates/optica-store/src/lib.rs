//! # optica-store: Document Store Layer for Optica POS
//!
//! Store access for the sale finalization engine.
//!
//! The backing store is a hosted document store with single-document writes
//! only; this crate exposes exactly that contract through traits and ships
//! two implementations:
//!
//! - [`pool::Database`] + [`repository`] - SQLite via sqlx (WAL mode,
//!   embedded migrations, runtime-bound queries)
//! - [`memory::MemoryStore`] - in-process maps for tests
//!
//! ## Module Organization
//!
//! - [`store`] - traits and protocol types (stock levels, intents)
//! - [`pool`] - connection pool creation and configuration
//! - [`migrations`] - embedded migrations
//! - [`repository`] - SQLite repositories
//! - [`memory`] - in-memory implementation
//! - [`error`] - store error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pool::{Database, DbConfig};
pub use repository::{InventoryRepository, SaleRepository};
pub use store::{
    AppliedDecrement, CommitBundle, DecrementOutcome, IntentState, InventoryStore, SaleIntent,
    SaleStore, StockLevel,
};
