//! Resolves incoming offers to catalog medicines by exact title.
//!
//! Matching is case-preserving string equality. "Aspirin" and "Aspirin 100mg"
//! from different pharmacies are distinct medicines; no normalization is applied.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::Medicine;
use crate::store::{CatalogStore, StoreError, StoreResult};

const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub medicine: Medicine,
    /// True when this call inserted the medicine.
    pub created: bool,
}

pub struct CatalogMatcher {
    store: Arc<dyn CatalogStore>,
    // title -> medicine seen during the current cycle
    seen: Mutex<HashMap<String, Medicine>>,
}

impl CatalogMatcher {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Drops titles remembered from the previous cycle so external catalog
    /// edits (deletes, renames) are observed.
    pub async fn reset(&self) {
        self.seen.lock().await.clear();
    }

    /// Finds the medicine with exactly this title, creating it if absent.
    ///
    /// Safe to call concurrently for the same new title: the store rejects the
    /// second insert with `Conflict`, and the loser re-reads the winner's row.
    pub async fn resolve(&self, title: &str) -> StoreResult<Resolution> {
        if let Some(m) = self.seen.lock().await.get(title) {
            return Ok(Resolution {
                medicine: m.clone(),
                created: false,
            });
        }

        let mut attempt = 0;
        let resolution = loop {
            attempt += 1;
            if let Some(existing) = self.store.find_medicine_by_title(title).await? {
                break Resolution {
                    medicine: existing,
                    created: false,
                };
            }
            match self.store.create_medicine(title).await {
                Ok(created) => {
                    debug!(id = created.id, title, "medicine created");
                    break Resolution {
                        medicine: created,
                        created: true,
                    };
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_CREATE_ATTEMPTS => {
                    debug!(title, attempt, "create lost race; re-reading");
                }
                Err(e) => {
                    if matches!(e, StoreError::Conflict { .. }) {
                        warn!(title, attempts = attempt, "title conflict persisted after retries");
                    }
                    return Err(e);
                }
            }
        };

        self.seen
            .lock()
            .await
            .insert(title.to_string(), resolution.medicine.clone());
        Ok(resolution)
    }

    /// Forgets a cached title, used when a write against it failed.
    pub async fn forget(&self, title: &str) {
        self.seen.lock().await.remove(title);
    }
}
