use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::PriceSource;
use crate::config::PriceConfig;
use crate::error::PriceLookupError;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Avanza search response
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    price: Option<HitPrice>,
}

#[derive(Debug, Deserialize)]
struct HitPrice {
    last: Option<Value>,
}

/// Looks assets up by name through the Avanza search endpoint
pub struct AvanzaPriceSource {
    client: Client,
    endpoint: String,
}

impl AvanzaPriceSource {
    pub fn new(config: &PriceConfig) -> Result<Self, PriceLookupError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl PriceSource for AvanzaPriceSource {
    fn name(&self) -> &str {
        "Avanza"
    }

    async fn lookup(&self, asset: &str) -> Result<Decimal, PriceLookupError> {
        debug!("Looking up price for {} at {}", asset, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&json!({ "query": asset, "limit": 5 }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PriceLookupError::Http {
                asset: asset.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: SearchResponse = response.json().await?;
        let last = body
            .hits
            .into_iter()
            .next()
            .and_then(|hit| hit.price)
            .and_then(|price| price.last)
            .ok_or_else(|| PriceLookupError::NotFound(asset.to_string()))?;

        let raw = match last {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        };

        parse_price(&raw).ok_or(PriceLookupError::Parse {
            asset: asset.to_string(),
            raw,
        })
    }
}

/// Parse a quoted price such as `"1\u{a0}234,50"`
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '\u{a0}' && *c != ' ')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    Decimal::from_str(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("1\u{a0}234,50"), Some(dec!(1234.50)));
        assert_eq!(parse_price("12 345,5"), Some(dec!(12345.5)));
        assert_eq!(parse_price("87.3"), Some(dec!(87.3)));
        assert_eq!(parse_price("-"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_search_response_shapes() {
        let body: SearchResponse =
            serde_json::from_str(r#"{"hits": [{"price": {"last": "101,5"}}, {"price": null}]}"#)
                .unwrap();
        assert_eq!(body.hits.len(), 2);
        assert!(body.hits[1].price.is_none());

        let empty: SearchResponse = serde_json::from_str(r#"{"totalNumberOfHits": 0}"#).unwrap();
        assert!(empty.hits.is_empty());
    }
}
