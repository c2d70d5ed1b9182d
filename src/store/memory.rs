use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CatalogStore, StoreError, StoreResult};
use crate::model::{Medicine, Price};

#[derive(Default)]
struct Tables {
    next_medicine_id: i64,
    medicines: HashMap<i64, Medicine>,
    medicine_ids_by_title: HashMap<String, i64>,
    prices: HashMap<(i64, i64), Price>,
}

/// In-process catalog used by tests and `--in-memory` runs.
///
/// A single lock guards all tables, so `create_medicine` observes the same
/// uniqueness guarantee the Postgres `UNIQUE (title)` constraint gives.
#[derive(Default)]
pub struct MemoryCatalogStore {
    tables: Mutex<Tables>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn medicines(&self) -> Vec<Medicine> {
        let tables = self.tables.lock().await;
        let mut out: Vec<Medicine> = tables.medicines.values().cloned().collect();
        out.sort_by_key(|m| m.id);
        out
    }

    pub async fn prices(&self) -> Vec<Price> {
        let tables = self.tables.lock().await;
        let mut out: Vec<Price> = tables.prices.values().cloned().collect();
        out.sort_by_key(|p| (p.pharmacy_id, p.medicine_id));
        out
    }

    /// Removes a medicine and its prices, as an external catalog admin would.
    pub async fn delete_medicine(&self, id: i64) {
        let mut tables = self.tables.lock().await;
        if let Some(m) = tables.medicines.remove(&id) {
            tables.medicine_ids_by_title.remove(&m.title);
        }
        tables.prices.retain(|(_, medicine_id), _| *medicine_id != id);
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find_medicine_by_title(&self, title: &str) -> StoreResult<Option<Medicine>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .medicine_ids_by_title
            .get(title)
            .and_then(|id| tables.medicines.get(id))
            .cloned())
    }

    async fn create_medicine(&self, title: &str) -> StoreResult<Medicine> {
        let mut tables = self.tables.lock().await;
        if tables.medicine_ids_by_title.contains_key(title) {
            return Err(StoreError::Conflict {
                title: title.to_string(),
            });
        }
        tables.next_medicine_id += 1;
        let medicine = Medicine {
            id: tables.next_medicine_id,
            title: title.to_string(),
        };
        tables
            .medicine_ids_by_title
            .insert(medicine.title.clone(), medicine.id);
        tables.medicines.insert(medicine.id, medicine.clone());
        Ok(medicine)
    }

    async fn find_price(&self, pharmacy_id: i64, medicine_id: i64) -> StoreResult<Option<Price>> {
        let tables = self.tables.lock().await;
        Ok(tables.prices.get(&(pharmacy_id, medicine_id)).cloned())
    }

    async fn upsert_price(&self, price: &Price) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.medicines.contains_key(&price.medicine_id) {
            return Err(StoreError::MissingMedicine(price.medicine_id));
        }
        tables
            .prices
            .insert((price.pharmacy_id, price.medicine_id), price.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    #[tokio::test]
    async fn create_medicine_rejects_duplicate_title() {
        let store = MemoryCatalogStore::new();
        let first = store.create_medicine("Aspirin").await.unwrap();
        let err = store.create_medicine("Aspirin").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref title } if title == "Aspirin"));
        let found = store.find_medicine_by_title("Aspirin").await.unwrap();
        assert_eq!(found, Some(first));
    }

    #[tokio::test]
    async fn title_lookup_is_case_preserving() {
        let store = MemoryCatalogStore::new();
        store.create_medicine("Aspirin").await.unwrap();
        assert!(store
            .find_medicine_by_title("aspirin")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn upsert_price_requires_existing_medicine() {
        let store = MemoryCatalogStore::new();
        let price = Price {
            pharmacy_id: 1,
            medicine_id: 99,
            external_id: "x".into(),
            price: BigDecimal::from(5),
            updated_at: Utc::now(),
        };
        let err = store.upsert_price(&price).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingMedicine(99)));
    }

    #[tokio::test]
    async fn upsert_price_replaces_row_for_same_key() {
        let store = MemoryCatalogStore::new();
        let med = store.create_medicine("Ibuprofen").await.unwrap();
        let mut price = Price {
            pharmacy_id: 1,
            medicine_id: med.id,
            external_id: "ib-1".into(),
            price: BigDecimal::from(10),
            updated_at: Utc::now(),
        };
        store.upsert_price(&price).await.unwrap();
        price.price = BigDecimal::from(12);
        store.upsert_price(&price).await.unwrap();

        let rows = store.prices().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, BigDecimal::from(12));
    }
}
