use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::model::IncomingOffer;

/// One decoded page of a paginated feed.
#[derive(Debug, Default)]
pub struct FeedPage {
    /// Page-count metadata; only the first page's value is consulted.
    pub total_pages: Option<u32>,
    pub offers: Vec<IncomingOffer>,
}

/// A feed addressed by 1-based page number.
#[async_trait]
pub trait PagedFeed: Send + Sync {
    fn label(&self) -> String;
    async fn fetch_page(&self, page: u32) -> Result<FeedPage>;
}

/// Reads page 1 to learn the page count, then fetches pages `2..=total` with at
/// most `concurrency` requests in flight.
///
/// Page 1 failing, or carrying no page count, fails the whole feed. A later page
/// failing only drops that page. Result order is not meaningful.
pub async fn fetch_all_pages<F>(feed: &F, concurrency: usize) -> Result<Vec<IncomingOffer>>
where
    F: PagedFeed + ?Sized,
{
    let label = feed.label();
    let start = Instant::now();
    let first = feed
        .fetch_page(1)
        .await
        .with_context(|| format!("{label}: first page fetch failed"))?;
    let total_pages = first
        .total_pages
        .ok_or_else(|| anyhow!("{label}: first page carried no page-count metadata"))?;

    let mut offers = first.offers;
    let mut failed_pages = 0usize;
    if total_pages > 1 {
        let mut pages = stream::iter(2..=total_pages)
            .map(|page| async move { (page, feed.fetch_page(page).await) })
            .buffer_unordered(concurrency.max(1));
        while let Some((page, res)) = pages.next().await {
            match res {
                Ok(p) => {
                    debug!(feed = %label, page, items = p.offers.len(), "page fetched");
                    offers.extend(p.offers);
                }
                Err(e) => {
                    failed_pages += 1;
                    warn!(feed = %label, page, error = %e, "page fetch failed; skipping page");
                }
            }
        }
    }

    info!(
        feed = %label,
        total_pages,
        failed_pages,
        offers = offers.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "feed fetched"
    );
    Ok(offers)
}

/// `ceil(count / per)`, at least one page so page 1 is always considered read.
pub fn pages_for_count(count: u64, per: u32) -> u32 {
    let per = u64::from(per.max(1));
    let pages = count.div_ceil(per).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}
