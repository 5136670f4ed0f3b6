//! # Payment Allocation Engine
//!
//! Splits a fixed payable total across an ordered list of payment-method
//! entries. The engine enforces, after every call, that the allocated sum
//! never exceeds the payable total; there is no silent clamping, the caller
//! is always told which entry was rejected.
//!
//! Finalization is blocked while the remaining balance exceeds the settle
//! tolerance (one centavo, absorbing rounding) or while any entry fails its
//! method-specific metadata validation.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{PaymentDetails, PaymentMethod};
use crate::validation;
use crate::SETTLE_TOLERANCE_CENTS;

// =============================================================================
// Payment Allocation
// =============================================================================

/// One entry of the allocation plan: an amount assigned to one method.
///
/// Ephemeral; the finalization transaction turns entries into durable
/// `PaymentRecord` documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentAllocation {
    pub amount_cents: i64,
    pub details: PaymentDetails,
    /// Gateway confirmation id, set once the method is authorized.
    pub confirmation_id: Option<String>,
}

impl PaymentAllocation {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    #[inline]
    pub fn method(&self) -> PaymentMethod {
        self.details.method()
    }

    /// For cash entries: change owed when the tendered amount exceeds the
    /// allocated amount.
    pub fn change(&self) -> Option<Money> {
        match self.details {
            PaymentDetails::Cash {
                tendered_cents: Some(tendered),
            } if tendered > self.amount_cents => {
                Some(Money::from_cents(tendered - self.amount_cents))
            }
            _ => None,
        }
    }
}

/// A metadata problem on one entry, reported per entry so the caller can
/// correct just the offending method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocationIssue {
    pub index: usize,
    pub method: PaymentMethod,
    pub message: String,
}

// =============================================================================
// Payment Plan
// =============================================================================

/// Ordered payment allocations against a fixed payable total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentPlan {
    payable_total_cents: i64,
    entries: Vec<PaymentAllocation>,
}

impl PaymentPlan {
    pub fn new(payable_total: Money) -> Self {
        PaymentPlan {
            payable_total_cents: payable_total.cents().max(0),
            entries: Vec::new(),
        }
    }

    /// Appends an entry with amount zero and the method's default metadata.
    /// Returns the new entry's index.
    pub fn add_method(&mut self, method: PaymentMethod) -> usize {
        self.entries.push(PaymentAllocation {
            amount_cents: 0,
            details: PaymentDetails::default_for(method),
            confirmation_id: None,
        });
        self.entries.len() - 1
    }

    /// Sets an entry's amount.
    ///
    /// Fails with `OverAllocation` when the amount plus every other entry
    /// would exceed the payable total. The entry is left unchanged on error.
    pub fn set_amount(&mut self, index: usize, amount: Money) -> CoreResult<()> {
        if amount.is_negative() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "amount cannot be negative".to_string(),
            });
        }
        if index >= self.entries.len() {
            return Err(CoreError::PaymentEntryNotFound { index });
        }
        let others: i64 = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, e)| e.amount_cents)
            .sum();
        if others + amount.cents() > self.payable_total_cents {
            return Err(CoreError::OverAllocation { index });
        }
        let entry = &mut self.entries[index];
        entry.amount_cents = amount.cents();
        // amount changed, a previous authorization no longer covers it
        entry.confirmation_id = None;
        Ok(())
    }

    /// Removes an entry, shifting later indexes down.
    pub fn remove_method(&mut self, index: usize) -> CoreResult<PaymentAllocation> {
        if index >= self.entries.len() {
            return Err(CoreError::PaymentEntryNotFound { index });
        }
        Ok(self.entries.remove(index))
    }

    /// Mutable access to an entry's method metadata. Amounts can only change
    /// through `set_amount`, which is what enforces the allocation bound.
    pub fn details_mut(&mut self, index: usize) -> CoreResult<&mut PaymentDetails> {
        self.entries
            .get_mut(index)
            .map(|e| &mut e.details)
            .ok_or(CoreError::PaymentEntryNotFound { index })
    }

    /// Stores the gateway confirmation for an authorized entry.
    pub fn record_confirmation(&mut self, index: usize, confirmation_id: String) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(CoreError::PaymentEntryNotFound { index })?;
        entry.confirmation_id = Some(confirmation_id);
        Ok(())
    }

    pub fn entries(&self) -> &[PaymentAllocation] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> CoreResult<&PaymentAllocation> {
        self.entries
            .get(index)
            .ok_or(CoreError::PaymentEntryNotFound { index })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn payable_total(&self) -> Money {
        Money::from_cents(self.payable_total_cents)
    }

    /// Re-caps the plan after the payable total changed (cart edit or
    /// discount change). Entries are kept; if their sum now exceeds the new
    /// total the plan reports it through `over_allocated` and finalize stays
    /// blocked until amounts are corrected.
    pub fn set_payable_total(&mut self, payable_total: Money) {
        self.payable_total_cents = payable_total.cents().max(0);
    }

    /// Sum of all entry amounts.
    pub fn allocated(&self) -> Money {
        Money::from_cents(self.entries.iter().map(|e| e.amount_cents).sum())
    }

    /// Unallocated balance, never negative.
    pub fn remaining_balance(&self) -> Money {
        Money::from_cents((self.payable_total_cents - self.allocated().cents()).max(0))
    }

    /// Amount by which entries exceed the payable total. Zero unless the
    /// payable total was re-capped below an existing allocation.
    pub fn over_allocated(&self) -> Money {
        Money::from_cents((self.allocated().cents() - self.payable_total_cents).max(0))
    }

    /// Whether the allocated sum settles the payable total, within the
    /// one-centavo tolerance.
    pub fn can_settle(&self) -> bool {
        self.over_allocated().is_zero()
            && self.remaining_balance().cents() <= SETTLE_TOLERANCE_CENTS
    }

    /// Method-specific metadata validation, reported per entry.
    ///
    /// External checks (installment-credit headroom, card authorization)
    /// happen during payment processing, not here.
    pub fn validate_entries(&self) -> Vec<AllocationIssue> {
        self.entries
            .iter()
            .enumerate()
            .flat_map(|(index, entry)| {
                entry_issues(entry)
                    .into_iter()
                    .map(move |message| AllocationIssue {
                        index,
                        method: entry.method(),
                        message,
                    })
            })
            .collect()
    }
}

/// Metadata problems on a single entry. Shape checks only; the external
/// checks (installment-credit headroom, card authorization) happen during
/// payment processing.
pub fn entry_issues(entry: &PaymentAllocation) -> Vec<String> {
    let mut issues = Vec::new();

    if entry.amount_cents == 0 {
        issues.push("amount is not set".to_string());
    }

    match &entry.details {
        PaymentDetails::Cash { tendered_cents } => {
            if let Some(tendered) = tendered_cents {
                if *tendered < entry.amount_cents {
                    issues.push(format!(
                        "tendered {} is below the allocated amount",
                        Money::from_cents(*tendered)
                    ));
                }
            }
        }
        PaymentDetails::DebitCard { card_token }
        | PaymentDetails::CreditCard { card_token, .. } => {
            if card_token.as_deref().map_or(true, str::is_empty) {
                issues.push("card token is required".to_string());
            }
            if let PaymentDetails::CreditCard { installments, .. } = entry.details {
                if let Err(e) = validation::validate_installments(installments) {
                    issues.push(e.to_string());
                }
            }
        }
        PaymentDetails::Pix { reference } => {
            if let Err(e) = validation::validate_reference("pix reference", reference.as_deref()) {
                issues.push(e.to_string());
            }
        }
        PaymentDetails::Boleto {
            due_date,
            reference,
        } => {
            if due_date.is_none()
                && validation::validate_reference("boleto reference", reference.as_deref()).is_err()
            {
                issues.push("a due date or a generated reference is required".to_string());
            }
        }
        PaymentDetails::InstallmentCredit { installments } => {
            if let Err(e) = validation::validate_installments(*installments) {
                issues.push(e.to_string());
            }
        }
        PaymentDetails::Crypto { address } => {
            if let Err(e) = validation::validate_crypto_address(address.as_deref()) {
                issues.push(e.to_string());
            }
        }
    }
    issues
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(payable_cents: i64) -> PaymentPlan {
        PaymentPlan::new(Money::from_cents(payable_cents))
    }

    #[test]
    fn test_single_cash_allocation_settles() {
        let mut plan = plan(90_000);
        let idx = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(idx, Money::from_cents(90_000)).unwrap();

        assert_eq!(plan.remaining_balance(), Money::zero());
        assert!(plan.can_settle());
    }

    #[test]
    fn test_partial_allocations_leave_remaining_balance() {
        // payable R$500.00, cash R$200.00 + pix R$200.00 -> R$100.00 left
        let mut plan = plan(50_000);
        let cash = plan.add_method(PaymentMethod::Cash);
        let pix = plan.add_method(PaymentMethod::Pix);
        plan.set_amount(cash, Money::from_cents(20_000)).unwrap();
        plan.set_amount(pix, Money::from_cents(20_000)).unwrap();

        assert_eq!(plan.remaining_balance().cents(), 10_000);
        assert!(!plan.can_settle());
    }

    #[test]
    fn test_over_allocation_rejected_and_entry_unchanged() {
        let mut plan = plan(50_000);
        let cash = plan.add_method(PaymentMethod::Cash);
        let pix = plan.add_method(PaymentMethod::Pix);
        plan.set_amount(cash, Money::from_cents(30_000)).unwrap();

        let err = plan.set_amount(pix, Money::from_cents(30_000)).unwrap_err();
        assert!(matches!(err, CoreError::OverAllocation { index } if index == pix));
        assert_eq!(plan.entry(pix).unwrap().amount_cents, 0);
        assert_eq!(plan.allocated().cents(), 30_000);
    }

    #[test]
    fn test_allocation_bound_holds_after_every_call() {
        let mut plan = plan(10_000);
        let mut indexes = Vec::new();
        for method in [
            PaymentMethod::Cash,
            PaymentMethod::Pix,
            PaymentMethod::CreditCard,
        ] {
            indexes.push(plan.add_method(method));
            assert!(plan.allocated() <= plan.payable_total());
        }
        for (step, amount) in [(0usize, 4_000), (1, 4_000), (2, 4_000), (0, 2_000), (2, 2_000)] {
            let _ = plan.set_amount(indexes[step], Money::from_cents(amount));
            assert!(plan.allocated() <= plan.payable_total());
            assert!(!plan.remaining_balance().is_negative());
        }
    }

    #[test]
    fn test_remove_method_frees_allocation() {
        let mut plan = plan(50_000);
        let cash = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(cash, Money::from_cents(50_000)).unwrap();

        let removed = plan.remove_method(cash).unwrap();
        assert_eq!(removed.amount_cents, 50_000);
        assert_eq!(plan.remaining_balance().cents(), 50_000);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_settle_tolerance_absorbs_one_centavo() {
        let mut plan = plan(10_001);
        let cash = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(cash, Money::from_cents(10_000)).unwrap();
        assert!(plan.can_settle());

        let mut plan = super::PaymentPlan::new(Money::from_cents(10_002));
        let cash = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(cash, Money::from_cents(10_000)).unwrap();
        assert!(!plan.can_settle());
    }

    #[test]
    fn test_recapping_payable_flags_over_allocation() {
        let mut plan = plan(50_000);
        let cash = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(cash, Money::from_cents(50_000)).unwrap();

        // cart shrank: payable drops below what is already allocated
        plan.set_payable_total(Money::from_cents(40_000));
        assert_eq!(plan.over_allocated().cents(), 10_000);
        assert!(!plan.can_settle());

        plan.set_amount(cash, Money::from_cents(40_000)).unwrap();
        assert!(plan.can_settle());
    }

    #[test]
    fn test_amount_change_clears_confirmation() {
        let mut plan = plan(50_000);
        let cash = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(cash, Money::from_cents(20_000)).unwrap();
        plan.record_confirmation(cash, "auth-1".to_string()).unwrap();

        plan.set_amount(cash, Money::from_cents(30_000)).unwrap();
        assert!(plan.entry(cash).unwrap().confirmation_id.is_none());
    }

    #[test]
    fn test_validate_entries_reports_per_entry() {
        let mut plan = plan(90_000);
        let pix = plan.add_method(PaymentMethod::Pix);
        let credit = plan.add_method(PaymentMethod::InstallmentCredit);
        let crypto = plan.add_method(PaymentMethod::Crypto);
        plan.set_amount(pix, Money::from_cents(30_000)).unwrap();
        plan.set_amount(credit, Money::from_cents(30_000)).unwrap();
        plan.set_amount(crypto, Money::from_cents(30_000)).unwrap();

        *plan.details_mut(credit).unwrap() = PaymentDetails::InstallmentCredit { installments: 0 };

        let issues = plan.validate_entries();
        let indexes: Vec<usize> = issues.iter().map(|i| i.index).collect();
        assert!(indexes.contains(&pix)); // missing reference
        assert!(indexes.contains(&credit)); // zero installments
        assert!(indexes.contains(&crypto)); // missing address

        // fixing one entry clears only that entry's issue
        *plan.details_mut(pix).unwrap() = PaymentDetails::Pix {
            reference: Some("pix-br-code-123".to_string()),
        };
        let issues = plan.validate_entries();
        assert!(!issues.iter().any(|i| i.index == pix));
        assert!(issues.iter().any(|i| i.index == credit));
    }

    #[test]
    fn test_boleto_valid_with_due_date_or_reference() {
        let mut plan = plan(10_000);
        let boleto = plan.add_method(PaymentMethod::Boleto);
        plan.set_amount(boleto, Money::from_cents(10_000)).unwrap();
        assert!(plan.validate_entries().iter().any(|i| i.index == boleto));

        *plan.details_mut(boleto).unwrap() = PaymentDetails::Boleto {
            due_date: Some(chrono::NaiveDate::from_ymd_opt(2026, 9, 10).unwrap()),
            reference: None,
        };
        assert!(plan.validate_entries().is_empty());

        *plan.details_mut(boleto).unwrap() = PaymentDetails::Boleto {
            due_date: None,
            reference: Some("34191.79001 01043.510047".to_string()),
        };
        assert!(plan.validate_entries().is_empty());
    }

    #[test]
    fn test_cash_change() {
        let mut plan = plan(9_000);
        let cash = plan.add_method(PaymentMethod::Cash);
        plan.set_amount(cash, Money::from_cents(9_000)).unwrap();
        *plan.details_mut(cash).unwrap() = PaymentDetails::Cash {
            tendered_cents: Some(10_000),
        };

        assert_eq!(plan.entry(cash).unwrap().change(), Some(Money::from_cents(1_000)));
    }
}
