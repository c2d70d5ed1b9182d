use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price observation reported by a provider, normalized to a common shape.
/// Transient: produced per fetch and consumed by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingOffer {
    pub external_id: String,
    pub title: String,
    pub price: BigDecimal,
    /// Pharmacy the offer was observed at.
    pub source_id: i64,
}

impl IncomingOffer {
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        price: Option<BigDecimal>,
        source_id: i64,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            price: price.unwrap_or_else(zero_price),
            source_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Medicine {
    pub id: i64,
    pub title: String,
}

/// Current price of one medicine at one pharmacy; `(pharmacy_id, medicine_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub pharmacy_id: i64,
    pub medicine_id: i64,
    pub external_id: String,
    pub price: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pharmacy {
    pub id: i64,
    pub name: String,
    /// URL template with a `{id}` placeholder for the provider's product id.
    pub medicine_link_template: Option<String>,
}

pub fn zero_price() -> BigDecimal {
    BigDecimal::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_price_defaults_to_zero() {
        let offer = IncomingOffer::new("42", "Aspirin", None, 2);
        assert_eq!(offer.price, BigDecimal::from(0));
    }
}
