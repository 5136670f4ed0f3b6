//! # Payment Gateways and Client Directory
//!
//! External collaborator interfaces plus the processor that runs every
//! payment entry through them.
//!
//! Each method authorizes independently with its own timeout, so one slow
//! card terminal never blocks the other entries. A timed-out or declined
//! entry reports its index; confirmations already obtained on other entries
//! stay recorded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use optica_core::{entry_issues, Money, PaymentAllocation, PaymentMethod, PaymentPlan};

use crate::error::{CheckoutError, CheckoutResult};

// =============================================================================
// Gateway Interface
// =============================================================================

/// Successful authorization of one payment entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub confirmation_id: String,
}

/// Gateway-side failure for one entry.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The method was refused (card declined, PIX rejected, address invalid).
    #[error("declined: {0}")]
    Declined(String),

    /// The gateway could not be reached or errored internally.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Uniform contract over the per-method payment gateways (card acquirer,
/// PIX QR generation, boleto registration, crypto transfer). Black box to
/// the engine: one allocation in, one confirmation or error out.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        sale_id: &str,
        allocation: &PaymentAllocation,
    ) -> Result<Authorization, GatewayError>;
}

// =============================================================================
// Client Directory Interface
// =============================================================================

/// Minimal client reference returned by directory lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRef {
    pub id: String,
    pub name: String,
}

/// Client lookups and the credit headroom check backing installment-credit
/// entries.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn find_client(&self, query: &str) -> Result<Option<ClientRef>, GatewayError>;

    /// Remaining store-credit the client may still commit to.
    async fn credit_headroom(&self, client_id: &str) -> Result<Money, GatewayError>;
}

// =============================================================================
// Payment Processor
// =============================================================================

/// Runs payment entries through metadata validation, external checks and
/// gateway authorization.
#[derive(Clone)]
pub struct PaymentProcessor {
    gateway: Arc<dyn PaymentGateway>,
    directory: Arc<dyn ClientDirectory>,
    authorization_timeout: Duration,
}

impl PaymentProcessor {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        directory: Arc<dyn ClientDirectory>,
        authorization_timeout: Duration,
    ) -> Self {
        PaymentProcessor {
            gateway,
            directory,
            authorization_timeout,
        }
    }

    /// Processes one entry: metadata validation, installment-credit headroom,
    /// then gateway authorization under this processor's timeout.
    pub async fn process_entry(
        &self,
        sale_id: &str,
        index: usize,
        allocation: &PaymentAllocation,
        client_id: Option<&str>,
    ) -> CheckoutResult<Authorization> {
        let fail = |reason: String| CheckoutError::PaymentAuthorizationFailed { index, reason };

        if let Some(issue) = entry_issues(allocation).into_iter().next() {
            return Err(fail(issue));
        }

        if allocation.method() == PaymentMethod::InstallmentCredit {
            let client_id = client_id.ok_or_else(|| {
                fail("installment credit requires a linked client".to_string())
            })?;
            let headroom = self
                .directory
                .credit_headroom(client_id)
                .await
                .map_err(|e| fail(e.to_string()))?;
            if headroom < allocation.amount() {
                return Err(fail(format!(
                    "credit headroom {} below allocated {}",
                    headroom,
                    allocation.amount()
                )));
            }
        }

        debug!(sale_id = %sale_id, index = %index, method = ?allocation.method(), amount = %allocation.amount(), "authorizing payment entry");

        match tokio::time::timeout(
            self.authorization_timeout,
            self.gateway.authorize(sale_id, allocation),
        )
        .await
        {
            Ok(Ok(authorization)) => Ok(authorization),
            Ok(Err(e)) => Err(fail(e.to_string())),
            Err(_) => {
                warn!(sale_id = %sale_id, index = %index, "payment authorization timed out");
                Err(fail("authorization timed out".to_string()))
            }
        }
    }

    /// Processes every unconfirmed entry of the plan concurrently, recording
    /// confirmations as they arrive.
    ///
    /// Entries already holding a confirmation are skipped, so a re-run after
    /// one method timed out re-authorizes only that method. On failure the
    /// lowest failing index is returned; confirmations obtained by the other
    /// entries stay on the plan.
    pub async fn process_plan(
        &self,
        sale_id: &str,
        plan: &mut PaymentPlan,
        client_id: Option<&str>,
    ) -> CheckoutResult<()> {
        let mut tasks: JoinSet<(usize, CheckoutResult<Authorization>)> = JoinSet::new();

        for (index, entry) in plan.entries().iter().enumerate() {
            if entry.confirmation_id.is_some() {
                continue;
            }
            let processor = self.clone();
            let sale_id = sale_id.to_string();
            let client_id = client_id.map(str::to_string);
            let entry = entry.clone();
            tasks.spawn(async move {
                let result = processor
                    .process_entry(&sale_id, index, &entry, client_id.as_deref())
                    .await;
                (index, result)
            });
        }

        let mut first_failure: Option<CheckoutError> = None;
        let mut failure_index = usize::MAX;
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| CheckoutError::PersistenceFailure {
                sale_id: sale_id.to_string(),
                detail: format!("authorization task failed: {e}"),
            })?;
            match result {
                Ok(authorization) => {
                    plan.record_confirmation(index, authorization.confirmation_id)?;
                }
                Err(err) if index < failure_index => {
                    failure_index = index;
                    first_failure = Some(err);
                }
                Err(_) => {}
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
