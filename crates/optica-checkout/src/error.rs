//! # Checkout Error Type
//!
//! Unified error type returned to the checkout UI.
//!
//! Domain violations (`CoreError`) and store failures (`StoreError`) pass
//! through; the two variants added here belong to this layer: per-entry
//! authorization failures and the mid-commit persistence failure whose
//! outcome is deliberately reported as unknown rather than failed.

use thiserror::Error;

use optica_core::CoreError;
use optica_store::StoreError;

/// Errors surfaced by the checkout session and the finalization engine.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Domain rule violation: insufficient stock, incomplete service order,
    /// over-allocation, unallocated balance, invalid amounts.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Store operation failed outside the commit window.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// One payment entry failed validation, authorization or timed out.
    /// Reported per entry so the caller can correct just that method.
    #[error("payment authorization failed for entry {index}: {reason}")]
    PaymentAuthorizationFailed { index: usize, reason: String },

    /// The store failed mid-commit. A durable intent record remains for
    /// reconciliation; the sale's outcome is unknown until it runs. Blind
    /// retries risk double-charging or double-decrementing.
    #[error("sale {sale_id} status unknown after persistence failure, do not retry blindly: {detail}")]
    PersistenceFailure { sale_id: String, detail: String },
}

impl CheckoutError {
    /// Whether the caller can fix this by editing the session (as opposed
    /// to a store/protocol failure needing operator attention).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CheckoutError::Core(_) | CheckoutError::PaymentAuthorizationFailed { .. }
        )
    }
}

/// Result type for checkout operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_failure_message_warns_against_retry() {
        let err = CheckoutError::PersistenceFailure {
            sale_id: "sale-1".to_string(),
            detail: "write failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("status unknown"));
        assert!(msg.contains("do not retry blindly"));
    }

    #[test]
    fn test_recoverability() {
        assert!(CheckoutError::Core(CoreError::EmptyCart).is_recoverable());
        assert!(CheckoutError::PaymentAuthorizationFailed {
            index: 0,
            reason: "declined".to_string()
        }
        .is_recoverable());
        assert!(!CheckoutError::PersistenceFailure {
            sale_id: "s".to_string(),
            detail: "d".to_string()
        }
        .is_recoverable());
    }
}
