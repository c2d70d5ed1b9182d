use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::paging::{fetch_all_pages, pages_for_count, FeedPage, PagedFeed};
use super::{coerce_price, ensure_success, value_as_id, ProviderAdapter};
use crate::model::IncomingOffer;

/// Apteka DS catalogue, browsed category by category.
///
/// - `GET {base}/categories` returns the category tree.
/// - `POST {base}/products/{slug}` with `{ "page": n, "per": size }` returns
///   `{ "count": total, "products": [ { "id", "name", "price" } ] }`.
#[derive(Debug, Clone)]
pub struct DsProvider {
    base_url: String,
    http: Client,
    source_id: i64,
    page_size: u32,
    concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryDto {
    pub name: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub children: Vec<CategoryDto>,
}

#[derive(Debug, Serialize)]
struct FilterRequest {
    page: u32,
    per: u32,
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    count: Option<u64>,
    #[serde(default)]
    products: Vec<ProductItem>,
}

#[derive(Debug, Deserialize)]
struct ProductItem {
    id: Option<Value>,
    name: Option<String>,
    price: Option<Value>,
}

/// Leaf slugs in depth-first order; a category with children is only a grouping.
pub fn leaf_slugs(categories: &[CategoryDto]) -> Vec<String> {
    let mut out = Vec::new();
    for c in categories {
        if c.children.is_empty() {
            if !c.slug.trim().is_empty() {
                out.push(c.slug.clone());
            }
        } else {
            out.extend(leaf_slugs(&c.children));
        }
    }
    out
}

impl DsProvider {
    pub fn new(
        base_url: &str,
        source_id: i64,
        page_size: u32,
        timeout: Duration,
        concurrency: usize,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pharmagator/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            source_id,
            page_size: page_size.max(1),
            concurrency: concurrency.max(1),
        })
    }

    async fn categories(&self) -> Result<Vec<CategoryDto>> {
        let url = format!("{}/categories", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("ds categories request")?;
        ensure_success(resp, "ds categories")
            .await?
            .json()
            .await
            .context("ds categories decode")
    }

    fn to_offer(&self, item: ProductItem) -> Option<IncomingOffer> {
        let title = item.name.filter(|n| !n.trim().is_empty())?;
        let external_id = item.id.as_ref().and_then(value_as_id)?;
        Some(IncomingOffer {
            external_id,
            title,
            price: coerce_price(item.price.as_ref()),
            source_id: self.source_id,
        })
    }
}

struct CategoryFeed<'a> {
    provider: &'a DsProvider,
    slug: &'a str,
}

#[async_trait]
impl<'a> PagedFeed for CategoryFeed<'a> {
    fn label(&self) -> String {
        format!("ds/{}", self.slug)
    }

    async fn fetch_page(&self, page: u32) -> Result<FeedPage> {
        let p = self.provider;
        let url = format!("{}/products/{}", p.base_url, self.slug);
        let resp = p
            .http
            .post(&url)
            .json(&FilterRequest {
                page,
                per: p.page_size,
            })
            .send()
            .await
            .with_context(|| format!("ds {} page {page} request", self.slug))?;
        let body: ProductsResponse = ensure_success(resp, "ds products")
            .await?
            .json()
            .await
            .with_context(|| format!("ds {} page {page} decode", self.slug))?;
        Ok(FeedPage {
            total_pages: body.count.map(|c| pages_for_count(c, p.page_size)),
            offers: body
                .products
                .into_iter()
                .filter_map(|item| p.to_offer(item))
                .collect(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for DsProvider {
    fn name(&self) -> &str {
        "ds"
    }

    fn source_id(&self) -> i64 {
        self.source_id
    }

    /// The category listing failing fails the provider; a single category
    /// failing is logged and skipped.
    async fn fetch(&self) -> Result<Vec<IncomingOffer>> {
        let slugs = leaf_slugs(&self.categories().await?);
        info!(categories = slugs.len(), "ds categories loaded");

        let mut offers = Vec::new();
        for slug in &slugs {
            let feed = CategoryFeed {
                provider: self,
                slug,
            };
            match fetch_all_pages(&feed, self.concurrency).await {
                Ok(batch) => offers.extend(batch),
                Err(e) => warn!(category = %slug, error = %format!("{e:#}"), "ds category skipped"),
            }
        }
        Ok(offers)
    }
}
