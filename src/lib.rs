//! Pharmacy price aggregation: polls external pharmacy feeds on a fixed
//! cadence and reconciles their offers into a medicine/price catalog.

pub mod config;
pub mod engine;
pub mod logging;
pub mod matcher;
pub mod model;
pub mod providers;
pub mod scheduler;
pub mod store;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use config::AppConfig;
pub use engine::{CycleReport, ReconciliationEngine};
pub use matcher::CatalogMatcher;
pub use model::{IncomingOffer, Medicine, Pharmacy, Price};
pub use providers::ProviderAdapter;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{CatalogStore, MemoryCatalogStore, PgCatalogStore, StoreError};
