//! # Inventory Repository
//!
//! Versioned stock records with optimistic-concurrency decrements.
//!
//! Every write bumps `version`. A decrement only applies when the caller's
//! previously read version is still current AND the quantity still covers
//! the request; anything else reports a conflict and the caller re-reads.
//! Two concurrent finalizations of the last unit can therefore never both
//! succeed.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{DecrementOutcome, InventoryStore, StockLevel};

/// Repository for inventory record operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Creates or replaces a stock record. Used when receiving stock and by
    /// test setup; sale paths only ever move quantity through the trait.
    pub async fn put_stock(
        &self,
        store_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> StoreResult<()> {
        debug!(store_id = %store_id, product_id = %product_id, quantity = %quantity, "putting stock record");

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO inventory_records (store_id, product_id, quantity_on_hand, version, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT (store_id, product_id) DO UPDATE SET
                quantity_on_hand = excluded.quantity_on_hand,
                version = inventory_records.version + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(quantity)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryStore for InventoryRepository {
    async fn read_quantity(&self, store_id: &str, product_id: &str) -> StoreResult<StockLevel> {
        let row = sqlx::query(
            r#"
            SELECT quantity_on_hand, version
            FROM inventory_records
            WHERE store_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("InventoryRecord", product_id))?;

        Ok(StockLevel {
            quantity: row.get("quantity_on_hand"),
            version: row.get("version"),
        })
    }

    async fn conditional_decrement(
        &self,
        store_id: &str,
        product_id: &str,
        qty: i64,
        expected_version: i64,
    ) -> StoreResult<DecrementOutcome> {
        debug!(
            store_id = %store_id,
            product_id = %product_id,
            qty = %qty,
            expected_version = %expected_version,
            "conditional decrement"
        );

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE inventory_records SET
                quantity_on_hand = quantity_on_hand - ?3,
                version = version + 1,
                updated_at = ?5
            WHERE store_id = ?1
              AND product_id = ?2
              AND version = ?4
              AND quantity_on_hand >= ?3
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(qty)
        .bind(expected_version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(DecrementOutcome::Conflict);
        }
        Ok(DecrementOutcome::Applied)
    }

    async fn restock(&self, store_id: &str, product_id: &str, qty: i64) -> StoreResult<()> {
        debug!(store_id = %store_id, product_id = %product_id, qty = %qty, "restocking");

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE inventory_records SET
                quantity_on_hand = quantity_on_hand + ?3,
                version = version + 1,
                updated_at = ?4
            WHERE store_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(qty)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("InventoryRecord", product_id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
