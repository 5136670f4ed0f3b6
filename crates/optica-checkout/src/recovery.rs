//! # Commit Reconciliation
//!
//! Restart-time recovery for crashed commits. Scans intent records older
//! than the staleness threshold and, keyed by how far the commit got:
//!
//! - `pending` (decrements possibly partial): restock exactly the marked
//!   decrements, mark the intent aborted
//! - `applied` (all decrements done, documents possibly missing): rewrite
//!   the missing documents from the frozen bundle, mark completed
//!
//! Document rewrites treat already-present documents as done, so running
//! reconciliation twice, or concurrently with a finalize retry, changes
//! nothing. Terminal intents past the retention window are purged.

use chrono::Utc;
use tracing::{info, warn};

use optica_store::{IntentState, SaleStore};

use crate::error::CheckoutResult;
use crate::finalize::{reverse_intent, write_bundle_documents, SaleFinalizer};

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Applied intents completed forward.
    pub completed: u64,
    /// Pending intents reversed.
    pub reversed: u64,
    /// Terminal intents purged.
    pub purged: u64,
}

/// Reconciliation pass over stale intents. Run on process restart and
/// periodically while idle.
pub struct Reconciler {
    finalizer: SaleFinalizer,
}

impl Reconciler {
    pub fn new(finalizer: SaleFinalizer) -> Self {
        Reconciler { finalizer }
    }

    pub async fn run(&self) -> CheckoutResult<ReconcileReport> {
        let (inventory, sales) = self.finalizer.stores();
        let config = self.finalizer.config();
        let now = Utc::now();
        let stale_cutoff = now - config.intent_stale_after;

        let mut report = ReconcileReport::default();

        for intent in sales.stale_intents(stale_cutoff).await? {
            match intent.state {
                IntentState::Pending => {
                    info!(sale_id = %intent.sale_id, "reconciling: reversing pending intent");
                    match reverse_intent(inventory.as_ref(), sales.as_ref(), &intent).await {
                        Ok(()) => report.reversed += 1,
                        // a racing worker may have won the transition; the
                        // next run sees the final state
                        Err(e) => {
                            warn!(sale_id = %intent.sale_id, error = %e, "reversal deferred")
                        }
                    }
                }
                IntentState::Applied => {
                    info!(sale_id = %intent.sale_id, "reconciling: completing applied intent");
                    write_bundle_documents(sales.as_ref(), &intent.bundle).await?;
                    match sales
                        .set_intent_state(
                            &intent.sale_id,
                            IntentState::Applied,
                            IntentState::Completed,
                        )
                        .await
                    {
                        Ok(()) => report.completed += 1,
                        Err(e) => {
                            warn!(sale_id = %intent.sale_id, error = %e, "completion transition lost")
                        }
                    }
                }
                // stale_intents only returns non-terminal states
                _ => {}
            }
        }

        report.purged = sales
            .purge_terminal_intents(now - config.intent_retention)
            .await?;

        if report != ReconcileReport::default() {
            info!(
                completed = report.completed,
                reversed = report.reversed,
                purged = report.purged,
                "reconciliation finished"
            );
        }
        Ok(report)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
