use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::paging::{fetch_all_pages, FeedPage, PagedFeed};
use super::{coerce_price, ensure_success, value_as_id, ProviderAdapter};
use crate::model::IncomingOffer;

/// Liki24 product listing.
///
/// `GET {base_url}?page=N` returns `{ "totalPages": .., "items": [ { "productId",
/// "name", "price" } ] }`; `price` may be null or missing.
#[derive(Debug, Clone)]
pub struct Liki24Provider {
    base_url: String,
    http: Client,
    source_id: i64,
    concurrency: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductsResponse {
    total_pages: Option<u32>,
    #[serde(default)]
    items: Vec<ProductItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductItem {
    #[serde(alias = "id")]
    product_id: Option<Value>,
    name: Option<String>,
    price: Option<Value>,
}

impl Liki24Provider {
    pub fn new(
        base_url: &str,
        source_id: i64,
        timeout: Duration,
        concurrency: usize,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pharmagator/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.to_string(),
            http,
            source_id,
            concurrency: concurrency.max(1),
        })
    }

    fn to_offer(&self, item: ProductItem) -> Option<IncomingOffer> {
        let title = item.name.filter(|n| !n.trim().is_empty())?;
        let external_id = item.product_id.as_ref().and_then(value_as_id)?;
        Some(IncomingOffer {
            external_id,
            title,
            price: coerce_price(item.price.as_ref()),
            source_id: self.source_id,
        })
    }
}

#[async_trait]
impl PagedFeed for Liki24Provider {
    fn label(&self) -> String {
        "liki24".into()
    }

    async fn fetch_page(&self, page: u32) -> Result<FeedPage> {
        let resp = self
            .http
            .get(&self.base_url)
            .header("Accept", "application/json")
            .query(&[("page", page)])
            .send()
            .await
            .with_context(|| format!("liki24 page {page} request"))?;
        let body: ProductsResponse = ensure_success(resp, "liki24 products")
            .await?
            .json()
            .await
            .with_context(|| format!("liki24 page {page} decode"))?;

        let raw_len = body.items.len();
        let offers: Vec<IncomingOffer> = body
            .items
            .into_iter()
            .filter_map(|item| self.to_offer(item))
            .collect();
        if offers.len() != raw_len {
            debug!(page, dropped = raw_len - offers.len(), "liki24 items without id or name dropped");
        }
        Ok(FeedPage {
            total_pages: body.total_pages,
            offers,
        })
    }
}

#[async_trait]
impl ProviderAdapter for Liki24Provider {
    fn name(&self) -> &str {
        "liki24"
    }

    fn source_id(&self) -> i64 {
        self.source_id
    }

    async fn fetch(&self) -> Result<Vec<IncomingOffer>> {
        fetch_all_pages(self, self.concurrency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> Liki24Provider {
        Liki24Provider::new(
            &format!("{}/api/products/", server.uri()),
            2,
            Duration::from_secs(5),
            4,
        )
        .unwrap()
    }

    async fn mount_page(server: &MockServer, page: u32, body: Value) {
        Mock::given(method("GET"))
            .and(path("/api/products/"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_all_declared_pages() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            1,
            json!({"totalPages": 2, "items": [
                {"productId": "a1", "name": "Aspirin", "price": 41.5},
                {"productId": 7, "name": "Nurofen", "price": null}
            ]}),
        )
        .await;
        mount_page(
            &server,
            2,
            json!({"totalPages": 2, "items": [
                {"productId": "c3", "name": "Citramon"}
            ]}),
        )
        .await;

        let mut offers = provider(&server).fetch().await.unwrap();
        offers.sort_by(|a, b| a.title.cmp(&b.title));

        assert_eq!(offers.len(), 3);
        assert_eq!(offers[0].title, "Aspirin");
        assert_eq!(offers[0].price, BigDecimal::from_str("41.5").unwrap());
        assert_eq!(offers[1].title, "Citramon");
        assert_eq!(offers[1].price, BigDecimal::from(0));
        assert_eq!(offers[2].external_id, "7");
        assert_eq!(offers[2].price, BigDecimal::from(0));
        assert!(offers.iter().all(|o| o.source_id == 2));
    }

    #[tokio::test]
    async fn server_error_on_first_page_is_provider_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = provider(&server).fetch().await.unwrap_err();
        assert!(format!("{err:#}").contains("503"));
    }

    #[tokio::test]
    async fn missing_total_pages_is_provider_failure() {
        let server = MockServer::start().await;
        mount_page(&server, 1, json!({"items": [{"productId": "a", "name": "A"}]})).await;
        assert!(provider(&server).fetch().await.is_err());
    }

    #[tokio::test]
    async fn items_without_name_are_dropped() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            1,
            json!({"totalPages": 1, "items": [
                {"productId": "a", "name": ""},
                {"productId": "b", "name": "Valid", "price": "10"}
            ]}),
        )
        .await;
        let offers = provider(&server).fetch().await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].external_id, "b");
    }
}
