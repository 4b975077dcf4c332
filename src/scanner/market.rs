//! Market data: bulk token list and per-mint trading pairs.

use crate::aggregator::HttpTransport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Entry of the bulk token list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenListEntry {
    pub address: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub decimals: u8,
    #[serde(rename = "logoURI", default)]
    pub logo_uri: Option<String>,
}

/// One trading pair for a mint.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketPair {
    pub base_address: String,
    pub base_symbol: Option<String>,
    pub base_name: Option<String>,
    /// USD price of the base token
    pub price_usd: Option<f64>,
    pub liquidity_usd: f64,
    pub image_url: Option<String>,
}

/// Highest-liquidity pair quoting `mint` as its base token.
pub fn best_pair<'a>(pairs: &'a [MarketPair], mint: &str) -> Option<&'a MarketPair> {
    pairs
        .iter()
        .filter(|p| p.base_address == mint)
        .max_by(|a, b| a.liquidity_usd.total_cmp(&b.liquidity_usd))
}

/// USD price of `mint` from its best pair.
pub fn price_from_pairs(pairs: &[MarketPair], mint: &str) -> Option<f64> {
    best_pair(pairs, mint)
        .and_then(|p| p.price_usd)
        .filter(|price| price.is_finite() && *price > 0.0)
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Bulk token list with symbols, names and logos.
    async fn token_list(&self) -> Result<Vec<TokenListEntry>>;

    /// Trading pairs for one mint.
    async fn pairs(&self, mint: &str) -> Result<Vec<MarketPair>>;
}

#[derive(Debug, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<RawPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    price_usd: Option<String>,
    liquidity: Option<RawLiquidity>,
    base_token: RawToken,
    info: Option<RawInfo>,
}

#[derive(Debug, Deserialize)]
struct RawLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInfo {
    image_url: Option<String>,
}

impl From<RawPair> for MarketPair {
    fn from(raw: RawPair) -> Self {
        Self {
            base_address: raw.base_token.address,
            base_symbol: raw.base_token.symbol,
            base_name: raw.base_token.name,
            price_usd: raw.price_usd.and_then(|p| p.parse().ok()),
            liquidity_usd: raw.liquidity.and_then(|l| l.usd).unwrap_or(0.0),
            image_url: raw.info.and_then(|i| i.image_url),
        }
    }
}

/// Jupiter token list plus DexScreener pair lookups over HTTP.
pub struct HttpMarketData {
    transport: Arc<dyn HttpTransport>,
    token_list_url: String,
    pair_lookup_url: String,
}

impl HttpMarketData {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        token_list_url: impl Into<String>,
        pair_lookup_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            token_list_url: token_list_url.into(),
            pair_lookup_url: pair_lookup_url.into(),
        }
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    #[instrument(skip(self))]
    async fn token_list(&self) -> Result<Vec<TokenListEntry>> {
        let reply = self.transport.get(&self.token_list_url, &[]).await?;
        if !reply.is_success() {
            return Err(anyhow!("Token list request returned HTTP {}", reply.status));
        }
        if let Some(content_type) = &reply.content_type {
            if !content_type.contains("json") {
                return Err(anyhow!("Token list returned non-JSON content type {}", content_type));
            }
        }
        let body = reply.json().map_err(|e| anyhow!(e))?;
        let entries: Vec<TokenListEntry> =
            serde_json::from_value(body).context("Token list has unexpected shape")?;
        debug!("Fetched token list with {} entries", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn pairs(&self, mint: &str) -> Result<Vec<MarketPair>> {
        let url = format!("{}{}", self.pair_lookup_url, mint);
        let reply = self.transport.get(&url, &[]).await?;
        if !reply.is_success() {
            return Err(anyhow!("Pair lookup for {} returned HTTP {}", mint, reply.status));
        }
        let body = reply.json().map_err(|e| anyhow!(e))?;
        let response: PairsResponse =
            serde_json::from_value(body).context("Pair lookup has unexpected shape")?;
        Ok(response
            .pairs
            .unwrap_or_default()
            .into_iter()
            .map(MarketPair::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(base: &str, price: Option<f64>, liquidity: f64) -> MarketPair {
        MarketPair {
            base_address: base.to_string(),
            base_symbol: None,
            base_name: None,
            price_usd: price,
            liquidity_usd: liquidity,
            image_url: None,
        }
    }

    #[test]
    fn test_best_pair_prefers_liquidity() {
        let pairs = vec![
            pair("M", Some(1.0), 100.0),
            pair("M", Some(2.0), 5_000.0),
            pair("Other", Some(9.0), 50_000.0),
        ];
        assert_eq!(price_from_pairs(&pairs, "M"), Some(2.0));
    }

    #[test]
    fn test_price_missing_or_zero() {
        assert_eq!(price_from_pairs(&[], "M"), None);
        assert_eq!(price_from_pairs(&[pair("M", Some(0.0), 10.0)], "M"), None);
        assert_eq!(price_from_pairs(&[pair("M", None, 10.0)], "M"), None);
    }

    #[test]
    fn test_raw_pair_conversion() {
        let raw: PairsResponse = serde_json::from_value(serde_json::json!({
            "pairs": [{
                "priceUsd": "0.0042",
                "liquidity": {"usd": 1234.5},
                "baseToken": {"address": "M", "name": "Meme", "symbol": "MEME"},
                "info": {"imageUrl": "https://img/meme.png"}
            }]
        }))
        .unwrap();
        let pairs: Vec<MarketPair> = raw.pairs.unwrap().into_iter().map(MarketPair::from).collect();
        assert_eq!(pairs[0].price_usd, Some(0.0042));
        assert_eq!(pairs[0].liquidity_usd, 1234.5);
        assert_eq!(pairs[0].base_symbol.as_deref(), Some("MEME"));
        assert_eq!(pairs[0].image_url.as_deref(), Some("https://img/meme.png"));
    }

    #[test]
    fn test_null_pairs() {
        let raw: PairsResponse = serde_json::from_value(serde_json::json!({"pairs": null})).unwrap();
        assert!(raw.pairs.is_none());
    }
}
