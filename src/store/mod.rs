//! Storage collaborator for the reconciliation engine.
//!
//! The engine needs four operations and nothing else: find a medicine by title,
//! create a medicine (atomic against duplicate titles), find the current price of
//! a `(pharmacy, medicine)` pair, and upsert that price.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::model::{Medicine, Price};

pub use memory::MemoryCatalogStore;
pub use postgres::PgCatalogStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A medicine with this title already exists (lost a create race).
    #[error("medicine title already exists: {title}")]
    Conflict { title: String },
    #[error("price references missing medicine {0}")]
    MissingMedicine(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_medicine_by_title(&self, title: &str) -> StoreResult<Option<Medicine>>;

    /// Inserts a new medicine. Returns `StoreError::Conflict` when the title is taken.
    async fn create_medicine(&self, title: &str) -> StoreResult<Medicine>;

    async fn find_price(&self, pharmacy_id: i64, medicine_id: i64) -> StoreResult<Option<Price>>;

    /// Inserts or replaces the row keyed by `(pharmacy_id, medicine_id)`.
    async fn upsert_price(&self, price: &Price) -> StoreResult<()>;
}
