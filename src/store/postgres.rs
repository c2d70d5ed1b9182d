use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, instrument};

use super::{CatalogStore, StoreError, StoreResult};
use crate::model::{Medicine, Pharmacy, Price};
use crate::util::db::Db;

/// Catalog backed by the `medicines`, `pharmacies` and `prices` tables.
#[derive(Clone)]
pub struct PgCatalogStore {
    db: Db,
}

impl PgCatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Makes sure the pharmacy row exists so `prices.pharmacy_id` can reference it.
    /// Name and link template are refreshed from configuration on every call.
    #[instrument(skip(self), fields(pharmacy_id = pharmacy.id))]
    pub async fn ensure_pharmacy(&self, pharmacy: &Pharmacy) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pharmacies (id, name, medicine_link_template) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name,
                                            medicine_link_template = EXCLUDED.medicine_link_template",
        )
        .persistent(false)
        .bind(pharmacy.id)
        .bind(&pharmacy.name)
        .bind(pharmacy.medicine_link_template.as_deref())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error, title: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict {
            title: title.to_string(),
        },
        _ => StoreError::Database(err),
    }
}

fn map_price_error(err: sqlx::Error, medicine_id: i64) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            StoreError::MissingMedicine(medicine_id)
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn find_medicine_by_title(&self, title: &str) -> StoreResult<Option<Medicine>> {
        let row = sqlx::query("SELECT id, title FROM medicines WHERE title = $1")
            .persistent(false)
            .bind(title)
            .fetch_optional(&self.db.pool)
            .await?;
        row.map(|r| -> StoreResult<Medicine> {
            Ok(Medicine {
                id: r.try_get("id")?,
                title: r.try_get("title")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn create_medicine(&self, title: &str) -> StoreResult<Medicine> {
        let row = sqlx::query("INSERT INTO medicines (title) VALUES ($1) RETURNING id")
            .persistent(false)
            .bind(title)
            .fetch_one(&self.db.pool)
            .await
            .map_err(|e| map_insert_error(e, title))?;
        let id: i64 = row.try_get("id")?;
        debug!(id, "medicine created");
        Ok(Medicine {
            id,
            title: title.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn find_price(&self, pharmacy_id: i64, medicine_id: i64) -> StoreResult<Option<Price>> {
        let row = sqlx::query(
            "SELECT pharmacy_id, medicine_id, external_id, price, updated_at
             FROM prices WHERE pharmacy_id = $1 AND medicine_id = $2",
        )
        .persistent(false)
        .bind(pharmacy_id)
        .bind(medicine_id)
        .fetch_optional(&self.db.pool)
        .await?;
        row.map(|r| -> StoreResult<Price> {
            Ok(Price {
                pharmacy_id: r.try_get("pharmacy_id")?,
                medicine_id: r.try_get("medicine_id")?,
                external_id: r.try_get("external_id")?,
                price: r.try_get::<BigDecimal, _>("price")?,
                updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
            })
        })
        .transpose()
    }

    // external_id is written once on insert; re-observations only move price and timestamp.
    #[instrument(skip(self, price), fields(pharmacy_id = price.pharmacy_id, medicine_id = price.medicine_id))]
    async fn upsert_price(&self, price: &Price) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO prices (pharmacy_id, medicine_id, external_id, price, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (pharmacy_id, medicine_id)
             DO UPDATE SET price = EXCLUDED.price, updated_at = EXCLUDED.updated_at",
        )
        .persistent(false)
        .bind(price.pharmacy_id)
        .bind(price.medicine_id)
        .bind(&price.external_id)
        .bind(&price.price)
        .bind(price.updated_at)
        .execute(&self.db.pool)
        .await
        .map_err(|e| map_price_error(e, price.medicine_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    // Needs a reachable Postgres: DATABASE_URL=... cargo test -- --ignored
    async fn store() -> PgCatalogStore {
        let mut cfg = DatabaseConfig::from_env().expect("DATABASE_URL must be set");
        cfg.auto_migrate = false;
        let db = Db::connect(&cfg).await.expect("connect");
        db.run_migrations(std::path::Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations")))
            .await
            .expect("migrations");
        PgCatalogStore::new(db)
    }

    #[tokio::test]
    #[ignore]
    async fn duplicate_title_maps_to_conflict() {
        let store = store().await;
        let title = format!("Conflict check {}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let first = store.create_medicine(&title).await.unwrap();

        match store.create_medicine(&title).await {
            Err(StoreError::Conflict { title: t }) => assert_eq!(t, title),
            other => panic!("expected Conflict, got {other:?}"),
        }
        let found = store.find_medicine_by_title(&title).await.unwrap();
        assert_eq!(found, Some(first));
    }

    #[tokio::test]
    #[ignore]
    async fn price_for_unknown_medicine_maps_to_missing_medicine() {
        let store = store().await;
        let pharmacy = Pharmacy {
            id: 9_001,
            name: "Test pharmacy".into(),
            medicine_link_template: None,
        };
        store.ensure_pharmacy(&pharmacy).await.unwrap();

        let price = Price {
            pharmacy_id: pharmacy.id,
            medicine_id: -1,
            external_id: "x".into(),
            price: BigDecimal::from(5),
            updated_at: Utc::now(),
        };
        match store.upsert_price(&price).await {
            Err(StoreError::MissingMedicine(id)) => assert_eq!(id, -1),
            other => panic!("expected MissingMedicine, got {other:?}"),
        }
    }
}
