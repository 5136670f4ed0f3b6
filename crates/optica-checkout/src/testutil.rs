//! Shared fixtures for checkout tests: canned gateways, a failure-injecting
//! sale store, and session builders.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use optica_core::{
    CartItem, IntakeReport, ItemCategory, LensPrescription, Money, PaymentAllocation,
    PaymentMethod, PaymentRecord, Sale, SaleStatus, ServiceOrder,
};
use optica_store::{
    AppliedDecrement, IntentState, MemoryStore, SaleIntent, SaleStore, StoreError, StoreResult,
};

use crate::finalize::{FinalizeConfig, SaleFinalizer};
use crate::gateway::{Authorization, ClientDirectory, ClientRef, GatewayError, PaymentGateway};
use crate::session::CheckoutSession;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Gateways / Directory
// =============================================================================

/// Approves everything with sequential confirmation ids.
#[derive(Default)]
pub struct ApprovingGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for ApprovingGateway {
    async fn authorize(
        &self,
        _sale_id: &str,
        _allocation: &PaymentAllocation,
    ) -> Result<Authorization, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Authorization {
            confirmation_id: format!("auth-{n}"),
        })
    }
}

/// Declines one method, approves the rest.
pub struct DecliningGateway {
    pub decline: PaymentMethod,
}

#[async_trait]
impl PaymentGateway for DecliningGateway {
    async fn authorize(
        &self,
        _sale_id: &str,
        allocation: &PaymentAllocation,
    ) -> Result<Authorization, GatewayError> {
        if allocation.method() == self.decline {
            return Err(GatewayError::Declined("issuer refused".to_string()));
        }
        Ok(Authorization {
            confirmation_id: "auth-ok".to_string(),
        })
    }
}

/// Directory with a fixed credit headroom.
pub struct StaticDirectory {
    pub headroom_cents: i64,
}

#[async_trait]
impl ClientDirectory for StaticDirectory {
    async fn find_client(&self, _query: &str) -> Result<Option<ClientRef>, GatewayError> {
        Ok(Some(ClientRef {
            id: "client-1".to_string(),
            name: "Ana Souza".to_string(),
        }))
    }

    async fn credit_headroom(&self, _client_id: &str) -> Result<Money, GatewayError> {
        Ok(Money::from_cents(self.headroom_cents))
    }
}

// =============================================================================
// Failure-Injecting Sale Store
// =============================================================================

/// Delegates to a `MemoryStore`, failing the first `create_sale` call when
/// armed. Simulates a store outage mid-commit, after decrements applied.
pub struct FailOnceSaleStore {
    pub inner: MemoryStore,
    fail_next_create_sale: AtomicBool,
}

impl FailOnceSaleStore {
    pub fn new(inner: MemoryStore) -> Self {
        FailOnceSaleStore {
            inner,
            fail_next_create_sale: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.fail_next_create_sale.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SaleStore for FailOnceSaleStore {
    async fn create_intent(&self, intent: &SaleIntent) -> StoreResult<()> {
        self.inner.create_intent(intent).await
    }

    async fn get_intent(&self, sale_id: &str) -> StoreResult<Option<SaleIntent>> {
        self.inner.get_intent(sale_id).await
    }

    async fn set_intent_state(
        &self,
        sale_id: &str,
        from: IntentState,
        to: IntentState,
    ) -> StoreResult<()> {
        self.inner.set_intent_state(sale_id, from, to).await
    }

    async fn mark_decrement_applied(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> StoreResult<()> {
        self.inner
            .mark_decrement_applied(sale_id, product_id, quantity)
            .await
    }

    async fn applied_decrements(&self, sale_id: &str) -> StoreResult<Vec<AppliedDecrement>> {
        self.inner.applied_decrements(sale_id).await
    }

    async fn stale_intents(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<SaleIntent>> {
        self.inner.stale_intents(older_than).await
    }

    async fn purge_terminal_intents(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.purge_terminal_intents(older_than).await
    }

    async fn create_sale(&self, sale: &Sale) -> StoreResult<()> {
        if self.fail_next_create_sale.swap(false, Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("simulated outage".to_string()));
        }
        self.inner.create_sale(sale).await
    }

    async fn get_sale(&self, sale_id: &str) -> StoreResult<Option<Sale>> {
        self.inner.get_sale(sale_id).await
    }

    async fn update_sale_status(
        &self,
        sale_id: &str,
        from: SaleStatus,
        to: SaleStatus,
    ) -> StoreResult<()> {
        self.inner.update_sale_status(sale_id, from, to).await
    }

    async fn create_service_order(&self, order: &ServiceOrder) -> StoreResult<()> {
        self.inner.create_service_order(order).await
    }

    async fn create_payment_record(&self, record: &PaymentRecord) -> StoreResult<()> {
        self.inner.create_payment_record(record).await
    }

    async fn service_orders_for_sale(&self, sale_id: &str) -> StoreResult<Vec<ServiceOrder>> {
        self.inner.service_orders_for_sale(sale_id).await
    }

    async fn payment_records_for_sale(&self, sale_id: &str) -> StoreResult<Vec<PaymentRecord>> {
        self.inner.payment_records_for_sale(sale_id).await
    }
}

// =============================================================================
// Engine / Session Builders
// =============================================================================

pub fn finalizer(store: &MemoryStore) -> SaleFinalizer {
    finalizer_with_sales(store, Arc::new(store.clone()))
}

pub fn finalizer_with_sales(store: &MemoryStore, sales: Arc<dyn SaleStore>) -> SaleFinalizer {
    finalizer_with_config(store, sales, FinalizeConfig::default())
}

pub fn finalizer_with_config(
    store: &MemoryStore,
    sales: Arc<dyn SaleStore>,
    config: FinalizeConfig,
) -> SaleFinalizer {
    SaleFinalizer::new(
        Arc::new(store.clone()),
        sales,
        Arc::new(ApprovingGateway::default()),
        Arc::new(StaticDirectory {
            headroom_cents: 1_000_000,
        }),
        config,
    )
}

pub fn finalizer_with_gateway(
    store: &MemoryStore,
    gateway: Arc<dyn PaymentGateway>,
) -> SaleFinalizer {
    SaleFinalizer::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        gateway,
        Arc::new(StaticDirectory {
            headroom_cents: 1_000_000,
        }),
        FinalizeConfig::default(),
    )
}

pub fn frame_item(price_cents: i64, qty: i64, stock: i64) -> CartItem {
    CartItem::new(
        "frame-ray",
        "Acetate frame",
        Money::from_cents(price_cents),
        qty,
        ItemCategory::Frame,
        stock,
    )
}

pub fn lens_item(price_cents: i64, qty: i64, stock: i64) -> CartItem {
    CartItem::new(
        "lens-cr39",
        "CR-39 single vision pair",
        Money::from_cents(price_cents),
        qty,
        ItemCategory::Lens,
        stock,
    )
}

pub fn complete_prescription() -> LensPrescription {
    LensPrescription {
        client_id: Some("client-1".to_string()),
        od_sphere: Some(-1.25),
        os_sphere: Some(-1.0),
        pd_mm: Some(62.0),
        ..Default::default()
    }
}

/// Session with one frame collection, fully paid in cash.
/// Subtotal R$1000.00; pass a discount on top via `set_discount`.
pub fn cash_session(store: &MemoryStore, cash_cents: i64) -> CheckoutSession {
    store.seed_inventory("store-1", "frame-ray", 10);
    let mut session = CheckoutSession::new("store-1");
    let c = session.add_collection("first pair");
    session.add_item(&c, frame_item(100_000, 1, 10)).unwrap();
    let cash = session.add_payment_method(PaymentMethod::Cash);
    session
        .set_payment_amount(cash, Money::from_cents(cash_cents))
        .unwrap();
    session
}

/// Session with one lens collection and completed intake, paid in cash.
pub fn lens_session(store: &MemoryStore, complete_intake: bool) -> CheckoutSession {
    store.seed_inventory("store-1", "lens-cr39", 5);
    let mut session = CheckoutSession::new("store-1");
    session.set_client("client-1");
    let c = session.add_collection("first pair");
    session.add_item(&c, lens_item(40_000, 1, 5)).unwrap();
    if complete_intake {
        session
            .record_intake(IntakeReport {
                collection_id: c,
                complete: true,
                payload: complete_prescription(),
            })
            .unwrap();
    }
    let cash = session.add_payment_method(PaymentMethod::Cash);
    session
        .set_payment_amount(cash, Money::from_cents(40_000))
        .unwrap();
    session
}
