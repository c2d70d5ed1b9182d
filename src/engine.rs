//! One ingestion pass: fetch every provider, then reconcile offers into the catalog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::matcher::CatalogMatcher;
use crate::model::{IncomingOffer, Price};
use crate::providers::ProviderAdapter;
use crate::store::{CatalogStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    PriceCreated,
    PriceUpdated,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub providers_ok: Vec<String>,
    pub providers_failed: Vec<String>,
    pub offers_seen: usize,
    pub medicines_created: usize,
    pub prices_created: usize,
    pub prices_updated: usize,
    pub offers_failed: usize,
    pub elapsed_ms: u64,
}

pub struct ReconciliationEngine {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    store: Arc<dyn CatalogStore>,
    matcher: CatalogMatcher,
    provider_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        store: Arc<dyn CatalogStore>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            matcher: CatalogMatcher::new(store.clone()),
            providers,
            store,
            provider_timeout,
        }
    }

    /// Runs exactly one full pass. Provider and per-offer failures are logged
    /// and counted, never propagated.
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();
        self.matcher.reset().await;

        let offers = self.collect_offers(&mut report).await;
        report.offers_seen = offers.len();

        for offer in &offers {
            match self.reconcile_offer(offer, &mut report).await {
                Ok(OfferOutcome::PriceCreated) => report.prices_created += 1,
                Ok(OfferOutcome::PriceUpdated) => report.prices_updated += 1,
                Err(e) => {
                    report.offers_failed += 1;
                    warn!(
                        source_id = offer.source_id,
                        external_id = %offer.external_id,
                        title = %offer.title,
                        error = %e,
                        "offer persist failed; skipping"
                    );
                    if matches!(e, StoreError::MissingMedicine(_)) {
                        self.matcher.forget(&offer.title).await;
                    }
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            providers_ok = report.providers_ok.len(),
            providers_failed = report.providers_failed.len(),
            offers = report.offers_seen,
            medicines_created = report.medicines_created,
            prices_created = report.prices_created,
            prices_updated = report.prices_updated,
            offers_failed = report.offers_failed,
            elapsed_ms = report.elapsed_ms,
            "ingestion cycle finished"
        );
        report
    }

    /// Fetches all providers concurrently, each bounded by the provider timeout,
    /// and concatenates their offers in configured provider order.
    ///
    /// Each fetch runs in its own task, so a panicking adapter is reported as a
    /// failed provider like any other error.
    async fn collect_offers(&self, report: &mut CycleReport) -> Vec<IncomingOffer> {
        let fetches = self.providers.iter().map(|p| {
            let p = p.clone();
            let limit = self.provider_timeout;
            async move {
                let started = Instant::now();
                info!(provider = p.name(), source_id = p.source_id(), "provider fetch start");
                let task = {
                    let p = p.clone();
                    tokio::spawn(async move { tokio::time::timeout(limit, p.fetch()).await })
                };
                let res = match task.await {
                    Ok(Ok(res)) => res,
                    Ok(Err(_)) => Err(anyhow::anyhow!("timed out after {limit:?}")),
                    Err(join_err) => Err(anyhow::anyhow!("fetch task aborted: {join_err}")),
                };
                (p, res, started.elapsed())
            }
        });

        let mut offers = Vec::new();
        for (p, res, elapsed) in join_all(fetches).await {
            match res {
                Ok(batch) => {
                    info!(
                        provider = p.name(),
                        offers = batch.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "provider fetch finished"
                    );
                    report.providers_ok.push(p.name().to_string());
                    offers.extend(batch);
                }
                Err(e) => {
                    warn!(provider = p.name(), error = %format!("{e:#}"), "provider fetch failed; skipping for this cycle");
                    report.providers_failed.push(p.name().to_string());
                }
            }
        }
        offers
    }

    /// Resolve the medicine, then create or refresh its price for the offer's pharmacy.
    async fn reconcile_offer(
        &self,
        offer: &IncomingOffer,
        report: &mut CycleReport,
    ) -> StoreResult<OfferOutcome> {
        let resolution = self.matcher.resolve(&offer.title).await?;
        if resolution.created {
            report.medicines_created += 1;
        }
        let medicine_id = resolution.medicine.id;
        let now = Utc::now();

        match self.store.find_price(offer.source_id, medicine_id).await? {
            Some(mut existing) => {
                existing.price = offer.price.clone();
                existing.updated_at = now;
                self.store.upsert_price(&existing).await?;
                Ok(OfferOutcome::PriceUpdated)
            }
            None => {
                let price = Price {
                    pharmacy_id: offer.source_id,
                    medicine_id,
                    external_id: offer.external_id.clone(),
                    price: offer.price.clone(),
                    updated_at: now,
                };
                self.store.upsert_price(&price).await?;
                debug!(pharmacy_id = offer.source_id, medicine_id, "price created");
                Ok(OfferOutcome::PriceCreated)
            }
        }
    }
}
