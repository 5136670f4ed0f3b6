//! # Domain Types
//!
//! Core domain types for the sale finalization engine.
//!
//! ## Dual-Key Identity Pattern
//! Durable entities carry a UUID v4 `id` used for store relations. Ephemeral
//! cart state references products by their catalog `product_id`.
//!
//! ## Snapshot Pattern
//! A finalized sale freezes copies of its line items (description, price,
//! category) at commit time, so later catalog or inventory edits never
//! rewrite sale history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::discount::Discount;
use crate::money::Money;

// =============================================================================
// Item Category
// =============================================================================

/// Category tag carried by every cart item.
///
/// The category decides whether the owning collection needs an assembly
/// service order before the sale can be finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    /// Spectacle frame.
    Frame,
    /// Prescription lens. Requires an assembly service order.
    Lens,
    /// Contact lenses, sold boxed.
    ContactLens,
    /// Non-prescription sunglasses.
    Sunglasses,
    /// Cases, cords, cleaning kits.
    Accessory,
}

impl ItemCategory {
    /// Whether items of this category require an assembly service order.
    #[inline]
    pub const fn requires_assembly(&self) -> bool {
        matches!(self, ItemCategory::Lens)
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// The tender type of one payment allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    DebitCard,
    CreditCard,
    Pix,
    Boleto,
    InstallmentCredit,
    Crypto,
}

// =============================================================================
// Payment Details
// =============================================================================

/// Method-specific payment metadata, keyed by method.
///
/// Each variant statically carries exactly the fields its method needs, so
/// a boleto can never hold a card token and an installment plan can never
/// lose its installment count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentDetails {
    /// Physical cash. `tendered_cents` is what the customer handed over,
    /// used to compute change.
    Cash { tendered_cents: Option<i64> },
    /// Debit card via the card terminal.
    DebitCard { card_token: Option<String> },
    /// Credit card, single or multi-installment on the card network.
    CreditCard {
        card_token: Option<String>,
        installments: u32,
    },
    /// PIX instant transfer. `reference` is the generated copy-paste code.
    Pix { reference: Option<String> },
    /// Bank slip. Needs a due date or a generated reference.
    Boleto {
        #[ts(as = "Option<String>")]
        due_date: Option<NaiveDate>,
        reference: Option<String>,
    },
    /// Store credit paid in installments, limited by the client's headroom.
    InstallmentCredit { installments: u32 },
    /// Crypto transfer to a destination address.
    Crypto { address: Option<String> },
}

impl PaymentDetails {
    /// Default metadata for a freshly added method entry.
    pub fn default_for(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::Cash => PaymentDetails::Cash {
                tendered_cents: None,
            },
            PaymentMethod::DebitCard => PaymentDetails::DebitCard { card_token: None },
            PaymentMethod::CreditCard => PaymentDetails::CreditCard {
                card_token: None,
                installments: 1,
            },
            PaymentMethod::Pix => PaymentDetails::Pix { reference: None },
            PaymentMethod::Boleto => PaymentDetails::Boleto {
                due_date: None,
                reference: None,
            },
            PaymentMethod::InstallmentCredit => {
                PaymentDetails::InstallmentCredit { installments: 1 }
            }
            PaymentMethod::Crypto => PaymentDetails::Crypto { address: None },
        }
    }

    /// The method this metadata belongs to.
    pub const fn method(&self) -> PaymentMethod {
        match self {
            PaymentDetails::Cash { .. } => PaymentMethod::Cash,
            PaymentDetails::DebitCard { .. } => PaymentMethod::DebitCard,
            PaymentDetails::CreditCard { .. } => PaymentMethod::CreditCard,
            PaymentDetails::Pix { .. } => PaymentMethod::Pix,
            PaymentDetails::Boleto { .. } => PaymentMethod::Boleto,
            PaymentDetails::InstallmentCredit { .. } => PaymentMethod::InstallmentCredit,
            PaymentDetails::Crypto { .. } => PaymentMethod::Crypto,
        }
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale.
///
/// `Finalized` and `Voided` are terminal. A sale transitions
/// `Draft -> Finalized` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Draft,
    Finalized,
    Voided,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Draft
    }
}

impl SaleStatus {
    /// Stable string form used in store columns.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Draft => "draft",
            SaleStatus::Finalized => "finalized",
            SaleStatus::Voided => "voided",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SaleStatus::Draft),
            "finalized" => Some(SaleStatus::Finalized),
            "voided" => Some(SaleStatus::Voided),
            _ => None,
        }
    }
}

// =============================================================================
// Service Order
// =============================================================================

/// Per-collection assembly requirement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrderStatus {
    /// Collection carries no category that needs assembly.
    NotRequired,
    /// Assembly needed, intake form not yet complete.
    PendingIntake,
    /// Intake captured and internally consistent.
    Complete,
}

/// Optical intake form payload: the prescription captured for one
/// lens-bearing collection.
///
/// OD is the right eye, OS the left. Spheres and the pupillary distance are
/// required for every lens-bearing item; cylinders, axes and addition are
/// prescription-dependent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LensPrescription {
    pub client_id: Option<String>,
    pub od_sphere: Option<f64>,
    pub od_cylinder: Option<f64>,
    pub od_axis: Option<u16>,
    pub os_sphere: Option<f64>,
    pub os_cylinder: Option<f64>,
    pub os_axis: Option<u16>,
    /// Pupillary distance in millimeters.
    pub pd_mm: Option<f64>,
    /// Near addition for multifocals.
    pub addition: Option<f64>,
    pub notes: Option<String>,
}

impl LensPrescription {
    /// Field names the intake form must still fill in.
    ///
    /// Empty means the prescription is complete enough to assemble.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.as_deref().map_or(true, str::is_empty) {
            missing.push("client_id");
        }
        if self.od_sphere.is_none() {
            missing.push("od_sphere");
        }
        if self.os_sphere.is_none() {
            missing.push("os_sphere");
        }
        if self.pd_mm.is_none() {
            missing.push("pd_mm");
        }
        missing
    }

    /// Whether all required fields are present.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// An assembly ticket covering one collection of a sale.
/// Durable once created by the finalization transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServiceOrder {
    pub id: String,
    pub sale_id: String,
    pub collection_id: String,
    pub client_id: String,
    pub status: ServiceOrderStatus,
    pub prescription: LensPrescription,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sale Snapshots
// =============================================================================

/// One frozen line item of a finalized sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLineSnapshot {
    pub product_id: String,
    /// Description at time of sale (frozen).
    pub description: String,
    /// Unit price in centavos at time of sale (frozen).
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_total_cents: i64,
    pub category: ItemCategory,
}

impl SaleLineSnapshot {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

/// Frozen copy of one cart collection at sale time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CollectionSnapshot {
    pub collection_id: String,
    pub label: String,
    pub lines: Vec<SaleLineSnapshot>,
    pub subtotal_cents: i64,
    /// Set when this collection required assembly.
    pub service_order_id: Option<String>,
}

// =============================================================================
// Payment Record
// =============================================================================

/// A settled payment towards a sale. One record per allocation.
/// Durable once created by the finalization transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentRecord {
    pub id: String,
    pub sale_id: String,
    /// Amount applied to the payable total, in centavos.
    pub amount_cents: i64,
    pub details: PaymentDetails,
    /// Gateway confirmation, when the method authorizes externally.
    pub confirmation_id: Option<String>,
    /// For cash: change returned to the customer.
    pub change_cents: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A finalized (or voided) sale document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub client_id: Option<String>,
    pub store_id: String,
    pub status: SaleStatus,
    pub collections: Vec<CollectionSnapshot>,
    pub discount: Option<Discount>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Total quantity per product across all collections, in first-seen
    /// order. Finalization decrements inventory from this aggregation.
    pub fn product_quantities(&self) -> Vec<(String, i64)> {
        let mut totals: Vec<(String, i64)> = Vec::new();
        for line in self.collections.iter().flat_map(|c| c.lines.iter()) {
            match totals.iter_mut().find(|(id, _)| id == &line.product_id) {
                Some((_, qty)) => *qty += line.quantity,
                None => totals.push((line.product_id.clone(), line.quantity)),
            }
        }
        totals
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
