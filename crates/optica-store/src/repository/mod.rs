//! # Repository Module
//!
//! SQLite implementations of the store traits. One repository per concern:
//!
//! - [`inventory`] - versioned stock records and conditional decrements
//! - [`sale`] - sale/service-order/payment documents and intent records

pub mod inventory;
pub mod sale;

pub use inventory::InventoryRepository;
pub use sale::SaleRepository;
