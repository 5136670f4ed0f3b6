//! # Service-Order Requirement Resolver
//!
//! Decides, per cart collection, whether an assembly service order is needed
//! and whether its intake form has been completed.
//!
//! ## State machine (per collection)
//! ```text
//!   no lens-bearing item ──────────► NotRequired
//!
//!   lens-bearing item present ─────► PendingIntake ──intake complete──► Complete
//!                                         ▲                               │
//!                                         └── cart composition changed ───┘
//! ```
//!
//! `PendingIntake -> Complete` fires when the collaborating intake form
//! reports completion. The transition is one-directional during a checkout
//! session; only a change to the collection's lens-bearing items sends a
//! completed collection back to `PendingIntake` for re-validation.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::cart::Cart;
use crate::error::{CoreError, CoreResult};
use crate::types::{LensPrescription, ServiceOrder, ServiceOrderStatus};

/// Intake fields every lens-bearing collection must provide.
pub const REQUIRED_INTAKE_FIELDS: [&str; 4] = ["client_id", "od_sphere", "os_sphere", "pd_mm"];

// =============================================================================
// Intake Exchange Types
// =============================================================================

/// Pushed to the intake form: which collection needs data and which fields
/// are still missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IntakeRequest {
    pub collection_id: String,
    pub required_fields: Vec<String>,
}

/// Reported back by the intake form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IntakeReport {
    pub collection_id: String,
    pub complete: bool,
    pub payload: LensPrescription,
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Debug, Clone, Default)]
struct IntakeEntry {
    payload: LensPrescription,
    /// Lens-bearing item ids the completed intake was validated against.
    /// `None` while the intake is still incomplete.
    validated_items: Option<Vec<String>>,
}

/// Tracks intake state per collection and gates finalization.
#[derive(Debug, Clone, Default)]
pub struct ServiceOrderResolver {
    states: BTreeMap<String, ServiceOrderStatus>,
    intakes: BTreeMap<String, IntakeEntry>,
}

impl ServiceOrderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every collection's status from the current cart.
    ///
    /// Called after any cart mutation. Collections removed from the cart are
    /// dropped; a completed intake whose lens-bearing items changed reverts
    /// to `PendingIntake`.
    pub fn evaluate(&mut self, cart: &Cart) {
        let mut states = BTreeMap::new();

        for collection in &cart.collections {
            let status = if !collection.requires_assembly() {
                ServiceOrderStatus::NotRequired
            } else {
                let fingerprint = fingerprint(collection.assembly_item_ids());
                match self.intakes.get(&collection.id) {
                    Some(entry)
                        if entry.payload.is_complete()
                            && entry.validated_items.as_deref() == Some(&fingerprint) =>
                    {
                        ServiceOrderStatus::Complete
                    }
                    _ => ServiceOrderStatus::PendingIntake,
                }
            };
            states.insert(collection.id.clone(), status);
        }

        self.intakes.retain(|id, _| states.contains_key(id));
        self.states = states;
    }

    /// Records an intake form report and returns the collection's new status.
    pub fn record_intake(&mut self, cart: &Cart, report: IntakeReport) -> CoreResult<ServiceOrderStatus> {
        let collection = cart.collection(&report.collection_id)?;

        let validated_items = if report.complete && report.payload.is_complete() {
            Some(fingerprint(collection.assembly_item_ids()))
        } else {
            None
        };
        self.intakes.insert(
            report.collection_id.clone(),
            IntakeEntry {
                payload: report.payload,
                validated_items,
            },
        );

        self.evaluate(cart);
        Ok(self.status(&report.collection_id))
    }

    /// Current status for one collection. `NotRequired` for ids the resolver
    /// has not seen (an empty collection needs nothing).
    pub fn status(&self, collection_id: &str) -> ServiceOrderStatus {
        self.states
            .get(collection_id)
            .copied()
            .unwrap_or(ServiceOrderStatus::NotRequired)
    }

    /// True only when every collection is `NotRequired` or `Complete`.
    /// Gates both payment processing and the finalization transaction.
    pub fn can_finalize(&self) -> bool {
        self.states
            .values()
            .all(|s| !matches!(s, ServiceOrderStatus::PendingIntake))
    }

    /// First collection still pending intake, if any.
    pub fn first_pending(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, s)| matches!(s, ServiceOrderStatus::PendingIntake))
            .map(|(id, _)| id.as_str())
    }

    /// Requests to push to the intake form: one per pending collection, with
    /// the fields still missing from what the form has sent so far.
    pub fn intake_requests(&self) -> Vec<IntakeRequest> {
        self.states
            .iter()
            .filter(|(_, s)| matches!(s, ServiceOrderStatus::PendingIntake))
            .map(|(id, _)| {
                let required_fields = match self.intakes.get(id) {
                    Some(entry) => entry
                        .payload
                        .missing_fields()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    None => REQUIRED_INTAKE_FIELDS
                        .iter()
                        .map(|f| f.to_string())
                        .collect(),
                };
                IntakeRequest {
                    collection_id: id.clone(),
                    required_fields,
                }
            })
            .collect()
    }

    /// Builds the durable service orders for a sale being finalized.
    ///
    /// Fails with `IncompleteServiceOrder` if any assembly-requiring
    /// collection is not `Complete`.
    pub fn build_orders(&self, cart: &Cart, sale_id: &str) -> CoreResult<Vec<ServiceOrder>> {
        let mut orders = Vec::new();
        for collection in &cart.collections {
            if !collection.requires_assembly() {
                continue;
            }
            let entry = self
                .intakes
                .get(&collection.id)
                .filter(|e| e.validated_items.is_some())
                .ok_or_else(|| CoreError::IncompleteServiceOrder {
                    collection_id: collection.id.clone(),
                })?;
            if self.status(&collection.id) != ServiceOrderStatus::Complete {
                return Err(CoreError::IncompleteServiceOrder {
                    collection_id: collection.id.clone(),
                });
            }

            let client_id = entry
                .payload
                .client_id
                .clone()
                .unwrap_or_default();
            orders.push(ServiceOrder {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.to_string(),
                collection_id: collection.id.clone(),
                client_id,
                status: ServiceOrderStatus::Complete,
                prescription: entry.payload.clone(),
                created_at: Utc::now(),
            });
        }
        Ok(orders)
    }
}

fn fingerprint(mut item_ids: Vec<String>) -> Vec<String> {
    item_ids.sort();
    item_ids
}

// =============================================================================
// Unit Tests
// =============================================================================
