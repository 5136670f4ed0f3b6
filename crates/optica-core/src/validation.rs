//! # Validation Module
//!
//! Input validation for checkout fields. These run before business logic;
//! the store enforces its own constraints independently.

use crate::error::ValidationError;
use crate::{MAX_INSTALLMENTS, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an item quantity: positive, at most `MAX_ITEM_QUANTITY`.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a payment amount in centavos: strictly positive.
pub fn validate_payment_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "payment amount".to_string(),
        });
    }
    Ok(())
}

/// Validates an installment count: 1..=MAX_INSTALLMENTS.
pub fn validate_installments(installments: u32) -> ValidationResult<()> {
    if installments < 1 || installments as i64 > MAX_INSTALLMENTS {
        return Err(ValidationError::OutOfRange {
            field: "installments".to_string(),
            min: 1,
            max: MAX_INSTALLMENTS,
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a generated payment reference (PIX copy code, boleto line).
pub fn validate_reference(field: &str, reference: Option<&str>) -> ValidationResult<()> {
    match reference.map(str::trim) {
        Some(r) if !r.is_empty() => Ok(()),
        _ => Err(ValidationError::Required {
            field: field.to_string(),
        }),
    }
}

/// Validates a crypto destination address.
///
/// Shape check only (non-empty, plausible length, no whitespace);
/// chain-specific checksum validation belongs to the gateway.
pub fn validate_crypto_address(address: Option<&str>) -> ValidationResult<()> {
    let address = match address.map(str::trim) {
        Some(a) if !a.is_empty() => a,
        _ => {
            return Err(ValidationError::Required {
                field: "crypto address".to_string(),
            })
        }
    };
    if address.len() < 20 || address.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "crypto address".to_string(),
            reason: "not a plausible destination address".to_string(),
        });
    }
    Ok(())
}

/// Validates a UUID string.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
