//! External pharmacy feeds.
//!
//! Every feed implements [`ProviderAdapter`]; the engine holds them as trait
//! objects and calls `fetch()` uniformly once per cycle.

pub mod ds;
pub mod liki24;
pub mod paging;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::model::{zero_price, IncomingOffer};

pub use ds::DsProvider;
pub use liki24::Liki24Provider;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Pharmacy id stamped on every offer this adapter yields.
    fn source_id(&self) -> i64;

    /// Fetch every offer the feed currently exposes. An `Err` means the
    /// provider contributes nothing to this cycle.
    async fn fetch(&self) -> Result<Vec<IncomingOffer>>;
}

/// Builds the enabled adapters in a stable order (Liki24, then DS).
pub fn build_providers(cfg: &AppConfig) -> Result<Vec<Arc<dyn ProviderAdapter>>> {
    let mut out: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    if let Some(c) = &cfg.liki24 {
        out.push(Arc::new(Liki24Provider::new(
            &c.base_url,
            c.pharmacy.id,
            cfg.ingest.http_timeout,
            cfg.ingest.page_concurrency,
        )?));
    }
    if let Some(c) = &cfg.ds {
        out.push(Arc::new(DsProvider::new(
            &c.base_url,
            c.pharmacy.id,
            c.page_size,
            cfg.ingest.http_timeout,
            cfg.ingest.page_concurrency,
        )?));
    }
    Ok(out)
}

/// Provider price fields arrive as numbers, numeric strings, or not at all.
/// Absent, null, unparseable and negative values all become zero.
pub(crate) fn coerce_price(v: Option<&Value>) -> BigDecimal {
    let parsed = match v {
        Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string()).ok(),
        Some(Value::String(s)) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    };
    match parsed {
        Some(p) if p >= zero_price() => p,
        Some(p) => {
            debug!(price = %p, "negative price coerced to zero");
            zero_price()
        }
        None => zero_price(),
    }
}

/// Product ids come back as either JSON strings or integers.
pub(crate) fn value_as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Turns a non-2xx response into an error carrying a clipped body for the logs.
pub(crate) async fn ensure_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
    anyhow::bail!("{what} failed: {status} url={url} body={body}")
}
