//! # Sale Repository
//!
//! Sale, service-order and payment documents plus the intent records that
//! drive the commit protocol.
//!
//! Documents are JSON payloads keyed by generated ids, written append-only,
//! mirroring the hosted store's single-document write semantics. The one
//! mutable column is a sale's status, flipped through a guarded update when
//! a sale is voided; the status column is authoritative over the payload on
//! reads.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use optica_core::{PaymentRecord, Sale, SaleStatus, ServiceOrder};

use crate::error::{StoreError, StoreResult};
use crate::store::{AppliedDecrement, CommitBundle, IntentState, SaleIntent, SaleStore};

/// Repository for sale-document and intent operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn parse_intent_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<SaleIntent> {
    let sale_id: String = row.get("sale_id");
    let state_raw: String = row.get("state");
    let state = IntentState::parse(&state_raw)
        .ok_or_else(|| StoreError::Internal(format!("unknown intent state '{state_raw}'")))?;
    let bundle: CommitBundle = serde_json::from_str(row.get::<String, _>("payload").as_str())?;
    Ok(SaleIntent {
        sale_id,
        state,
        bundle,
        created_at: parse_timestamp(row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_timestamp(row.get::<String, _>("updated_at").as_str())?,
    })
}

#[async_trait::async_trait]
impl SaleStore for SaleRepository {
    async fn create_intent(&self, intent: &SaleIntent) -> StoreResult<()> {
        debug!(sale_id = %intent.sale_id, "creating sale intent");

        let existing: Option<String> =
            sqlx::query_scalar("SELECT state FROM sale_intents WHERE sale_id = ?1")
                .bind(&intent.sale_id)
                .fetch_optional(&self.pool)
                .await?;

        let payload = serde_json::to_string(&intent.bundle)?;
        let created_at = intent.created_at.to_rfc3339();
        let updated_at = intent.updated_at.to_rfc3339();

        match existing.as_deref().map(IntentState::parse) {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO sale_intents (sale_id, state, payload, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                )
                .bind(&intent.sale_id)
                .bind(IntentState::Pending.as_str())
                .bind(payload)
                .bind(created_at)
                .bind(updated_at)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            Some(Some(IntentState::Aborted)) => {
                // A corrected checkout retries under the same sale id; the
                // reversed attempt's markers must not leak into the new one.
                sqlx::query("DELETE FROM intent_decrements WHERE sale_id = ?1")
                    .bind(&intent.sale_id)
                    .execute(&self.pool)
                    .await?;
                sqlx::query(
                    r#"
                    UPDATE sale_intents
                    SET state = ?2, payload = ?3, created_at = ?4, updated_at = ?5
                    WHERE sale_id = ?1
                    "#,
                )
                .bind(&intent.sale_id)
                .bind(IntentState::Pending.as_str())
                .bind(payload)
                .bind(created_at)
                .bind(updated_at)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            Some(_) => Err(StoreError::duplicate(
                "sale_intents.sale_id",
                &intent.sale_id,
            )),
        }
    }

    async fn get_intent(&self, sale_id: &str) -> StoreResult<Option<SaleIntent>> {
        let row = sqlx::query(
            "SELECT sale_id, state, payload, created_at, updated_at FROM sale_intents WHERE sale_id = ?1",
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_intent_row).transpose()
    }

    async fn set_intent_state(
        &self,
        sale_id: &str,
        from: IntentState,
        to: IntentState,
    ) -> StoreResult<()> {
        debug!(sale_id = %sale_id, from = from.as_str(), to = to.as_str(), "intent transition");

        let result = sqlx::query(
            "UPDATE sale_intents SET state = ?3, updated_at = ?4 WHERE sale_id = ?1 AND state = ?2",
        )
        .bind(sale_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                format!("SaleIntent ({})", from.as_str()),
                sale_id,
            ));
        }
        Ok(())
    }

    async fn mark_decrement_applied(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> StoreResult<()> {
        // REPLACE keeps the marker idempotent across commit retries.
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO intent_decrements (sale_id, product_id, quantity, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(sale_id)
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn applied_decrements(&self, sale_id: &str) -> StoreResult<Vec<AppliedDecrement>> {
        let rows = sqlx::query(
            "SELECT product_id, quantity FROM intent_decrements WHERE sale_id = ?1 ORDER BY created_at",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedDecrement {
                product_id: row.get("product_id"),
                quantity: row.get("quantity"),
            })
            .collect())
    }

    async fn stale_intents(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<SaleIntent>> {
        let rows = sqlx::query(
            r#"
            SELECT sale_id, state, payload, created_at, updated_at
            FROM sale_intents
            WHERE state IN ('pending', 'applied') AND updated_at < ?1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(older_than.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_intent_row).collect()
    }

    async fn purge_terminal_intents(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let threshold = older_than.to_rfc3339();

        sqlx::query(
            r#"
            DELETE FROM intent_decrements WHERE sale_id IN (
                SELECT sale_id FROM sale_intents
                WHERE state IN ('completed', 'aborted') AND updated_at < ?1
            )
            "#,
        )
        .bind(&threshold)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            "DELETE FROM sale_intents WHERE state IN ('completed', 'aborted') AND updated_at < ?1",
        )
        .bind(&threshold)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_sale(&self, sale: &Sale) -> StoreResult<()> {
        debug!(sale_id = %sale.id, total = %sale.total_cents, "writing sale document");

        let payload = serde_json::to_string(sale)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO sale_documents (id, status, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&sale.id)
        .bind(sale.status.as_str())
        .bind(payload)
        .bind(sale.created_at.to_rfc3339())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_sale(&self, sale_id: &str) -> StoreResult<Option<Sale>> {
        let row = sqlx::query("SELECT status, payload FROM sale_documents WHERE id = ?1")
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let mut sale: Sale = serde_json::from_str(row.get::<String, _>("payload").as_str())?;
        // the status column is authoritative after a void
        let status_raw: String = row.get("status");
        sale.status = SaleStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Internal(format!("unknown sale status '{status_raw}'")))?;
        Ok(Some(sale))
    }

    async fn update_sale_status(
        &self,
        sale_id: &str,
        from: SaleStatus,
        to: SaleStatus,
    ) -> StoreResult<()> {
        debug!(sale_id = %sale_id, from = from.as_str(), to = to.as_str(), "sale status transition");

        let result = sqlx::query(
            "UPDATE sale_documents SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        )
        .bind(sale_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                format!("Sale ({})", from.as_str()),
                sale_id,
            ));
        }
        Ok(())
    }

    async fn create_service_order(&self, order: &ServiceOrder) -> StoreResult<()> {
        debug!(order_id = %order.id, sale_id = %order.sale_id, "writing service order document");

        let payload = serde_json::to_string(order)?;
        sqlx::query(
            r#"
            INSERT INTO service_order_documents (id, sale_id, collection_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&order.id)
        .bind(&order.sale_id)
        .bind(&order.collection_id)
        .bind(payload)
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_payment_record(&self, record: &PaymentRecord) -> StoreResult<()> {
        debug!(payment_id = %record.id, sale_id = %record.sale_id, amount = %record.amount_cents, "writing payment document");

        let payload = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO payment_documents (id, sale_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&record.id)
        .bind(&record.sale_id)
        .bind(payload)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn service_orders_for_sale(&self, sale_id: &str) -> StoreResult<Vec<ServiceOrder>> {
        let rows = sqlx::query(
            "SELECT payload FROM service_order_documents WHERE sale_id = ?1 ORDER BY created_at",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_str(row.get::<String, _>("payload").as_str())
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn payment_records_for_sale(&self, sale_id: &str) -> StoreResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(
            "SELECT payload FROM payment_documents WHERE sale_id = ?1 ORDER BY created_at",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_str(row.get::<String, _>("payload").as_str())
                    .map_err(StoreError::from)
            })
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use optica_core::{CollectionSnapshot, ItemCategory, SaleLineSnapshot};

    fn sample_sale(id: &str) -> Sale {
        Sale {
            id: id.to_string(),
            client_id: Some("client-1".to_string()),
            store_id: "store-1".to_string(),
            status: SaleStatus::Finalized,
            collections: vec![CollectionSnapshot {
                collection_id: "c1".to_string(),
                label: "first pair".to_string(),
                lines: vec![SaleLineSnapshot {
                    product_id: "frame-ray".to_string(),
                    description: "Acetate frame".to_string(),
                    unit_price_cents: 25_000,
                    quantity: 1,
                    line_total_cents: 25_000,
                    category: ItemCategory::Frame,
                }],
                subtotal_cents: 25_000,
                service_order_id: None,
            }],
            discount: None,
            subtotal_cents: 25_000,
            discount_cents: 0,
            total_cents: 25_000,
            created_at: Utc::now(),
            finalized_at: Some(Utc::now()),
        }
    }

    fn sample_intent(sale_id: &str) -> SaleIntent {
        let now = Utc::now();
        SaleIntent {
            sale_id: sale_id.to_string(),
            state: IntentState::Pending,
            bundle: CommitBundle {
                sale: sample_sale(sale_id),
                service_orders: Vec::new(),
                payments: Vec::new(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    async fn repo() -> SaleRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.sales()
    }

    #[tokio::test]
    async fn test_sale_document_round_trip() {
        let repo = repo().await;
        let sale = sample_sale("sale-1");
        repo.create_sale(&sale).await.unwrap();

        let loaded = repo.get_sale("sale-1").await.unwrap().unwrap();
        assert_eq!(loaded, sale);
        assert!(repo.get_sale("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_sale_rejected() {
        let repo = repo().await;
        let sale = sample_sale("sale-1");
        repo.create_sale(&sale).await.unwrap();

        let err = repo.create_sale(&sale).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_void_status_is_authoritative_on_read() {
        let repo = repo().await;
        repo.create_sale(&sample_sale("sale-1")).await.unwrap();

        repo.update_sale_status("sale-1", SaleStatus::Finalized, SaleStatus::Voided)
            .await
            .unwrap();

        let loaded = repo.get_sale("sale-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SaleStatus::Voided);

        // voided is terminal: the guarded update no longer matches
        let err = repo
            .update_sale_status("sale-1", SaleStatus::Finalized, SaleStatus::Voided)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_intent_lifecycle() {
        let repo = repo().await;
        let intent = sample_intent("sale-1");
        repo.create_intent(&intent).await.unwrap();

        let loaded = repo.get_intent("sale-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, IntentState::Pending);
        assert_eq!(loaded.bundle, intent.bundle);

        repo.set_intent_state("sale-1", IntentState::Pending, IntentState::Applied)
            .await
            .unwrap();
        repo.set_intent_state("sale-1", IntentState::Applied, IntentState::Completed)
            .await
            .unwrap();

        // a second worker cannot win the same transition
        let err = repo
            .set_intent_state("sale-1", IntentState::Applied, IntentState::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_active_intent_blocks_duplicate() {
        let repo = repo().await;
        repo.create_intent(&sample_intent("sale-1")).await.unwrap();

        let err = repo.create_intent(&sample_intent("sale-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_aborted_intent_is_replaced() {
        let repo = repo().await;
        repo.create_intent(&sample_intent("sale-1")).await.unwrap();
        repo.mark_decrement_applied("sale-1", "frame-ray", 1)
            .await
            .unwrap();
        repo.set_intent_state("sale-1", IntentState::Pending, IntentState::Aborted)
            .await
            .unwrap();

        // retry under the same sale id succeeds with clean markers
        repo.create_intent(&sample_intent("sale-1")).await.unwrap();
        let loaded = repo.get_intent("sale-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, IntentState::Pending);
        assert!(repo.applied_decrements("sale-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decrement_markers() {
        let repo = repo().await;
        repo.create_intent(&sample_intent("sale-1")).await.unwrap();

        repo.mark_decrement_applied("sale-1", "frame-ray", 1)
            .await
            .unwrap();
        repo.mark_decrement_applied("sale-1", "lens-cr39", 2)
            .await
            .unwrap();
        // retried marker stays idempotent
        repo.mark_decrement_applied("sale-1", "lens-cr39", 2)
            .await
            .unwrap();

        let markers = repo.applied_decrements("sale-1").await.unwrap();
        assert_eq!(markers.len(), 2);
        assert!(markers.contains(&AppliedDecrement {
            product_id: "lens-cr39".to_string(),
            quantity: 2,
        }));
    }

    #[tokio::test]
    async fn test_stale_intents_and_purge() {
        let repo = repo().await;
        repo.create_intent(&sample_intent("sale-1")).await.unwrap();
        repo.create_intent(&sample_intent("sale-2")).await.unwrap();
        repo.set_intent_state("sale-2", IntentState::Pending, IntentState::Applied)
            .await
            .unwrap();
        repo.create_intent(&sample_intent("sale-3")).await.unwrap();
        repo.set_intent_state("sale-3", IntentState::Pending, IntentState::Aborted)
            .await
            .unwrap();

        // everything written just now is stale relative to a future cutoff
        let cutoff = Utc::now() + chrono::Duration::hours(1);
        let stale = repo.stale_intents(cutoff).await.unwrap();
        let ids: Vec<&str> = stale.iter().map(|i| i.sale_id.as_str()).collect();
        assert_eq!(ids, vec!["sale-1", "sale-2"]); // aborted one is terminal

        let purged = repo.purge_terminal_intents(cutoff).await.unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get_intent("sale-3").await.unwrap().is_none());
        // non-terminal intents survive the purge
        assert!(repo.get_intent("sale-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_payment_and_service_order_documents() {
        let repo = repo().await;
        let record = PaymentRecord {
            id: "pay-1".to_string(),
            sale_id: "sale-1".to_string(),
            amount_cents: 90_000,
            details: optica_core::PaymentDetails::Cash {
                tendered_cents: Some(100_000),
            },
            confirmation_id: None,
            change_cents: Some(10_000),
            created_at: Utc::now(),
        };
        repo.create_payment_record(&record).await.unwrap();

        let loaded = repo.payment_records_for_sale("sale-1").await.unwrap();
        assert_eq!(loaded, vec![record]);

        let order = ServiceOrder {
            id: "os-1".to_string(),
            sale_id: "sale-1".to_string(),
            collection_id: "c1".to_string(),
            client_id: "client-1".to_string(),
            status: optica_core::ServiceOrderStatus::Complete,
            prescription: optica_core::LensPrescription {
                client_id: Some("client-1".to_string()),
                od_sphere: Some(-1.25),
                os_sphere: Some(-1.0),
                pd_mm: Some(62.0),
                ..Default::default()
            },
            created_at: Utc::now(),
        };
        repo.create_service_order(&order).await.unwrap();

        let loaded = repo.service_orders_for_sale("sale-1").await.unwrap();
        assert_eq!(loaded, vec![order]);
    }
}
