//! Token metadata resolution with a cached bulk token list.

use super::market::{MarketDataSource, MarketPair, TokenListEntry};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const TOKEN_LIST_KEY: &str = "token-list";

/// Display metadata for one mint.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub logo_uri: Option<String>,
}

impl TokenMetadata {
    /// Placeholder for mints no source knows about.
    pub fn placeholder(mint: &str) -> Self {
        Self {
            symbol: mint.chars().take(4).collect::<String>().to_uppercase(),
            name: "Unknown Token".to_string(),
            logo_uri: None,
        }
    }
}

type TokenIndex = Arc<HashMap<String, TokenListEntry>>;

/// Resolves metadata from the bulk list, then the mint's pairs, then a
/// placeholder.
pub struct MetadataResolver {
    market: Arc<dyn MarketDataSource>,
    token_list: Cache<&'static str, TokenIndex>,
}

impl MetadataResolver {
    pub fn new(market: Arc<dyn MarketDataSource>, ttl: Duration, max_entries: u64) -> Self {
        let token_list = Cache::builder()
            .max_capacity(max_entries.max(1))
            .time_to_live(ttl)
            .build();
        Self { market, token_list }
    }

    /// Token list keyed by mint. Failed fetches yield an empty index and are
    /// not cached.
    async fn token_index(&self) -> TokenIndex {
        if let Some(index) = self.token_list.get(TOKEN_LIST_KEY).await {
            return index;
        }

        match self.market.token_list().await {
            Ok(entries) => {
                let index: TokenIndex = Arc::new(
                    entries
                        .into_iter()
                        .map(|entry| (entry.address.clone(), entry))
                        .collect(),
                );
                debug!("Cached token list with {} entries", index.len());
                self.token_list.insert(TOKEN_LIST_KEY, index.clone()).await;
                index
            }
            Err(e) => {
                warn!("Token list unavailable: {:#}", e);
                Arc::new(HashMap::new())
            }
        }
    }

    pub async fn resolve(&self, mint: &str, pairs: &[MarketPair]) -> TokenMetadata {
        let index = self.token_index().await;
        if let Some(entry) = index.get(mint) {
            return TokenMetadata {
                symbol: entry.symbol.clone(),
                name: entry.name.clone(),
                logo_uri: entry.logo_uri.clone(),
            };
        }

        let from_pair = pairs
            .iter()
            .find(|p| p.base_address == mint && p.base_symbol.is_some());
        if let Some(pair) = from_pair {
            let placeholder = TokenMetadata::placeholder(mint);
            return TokenMetadata {
                symbol: pair.base_symbol.clone().unwrap_or(placeholder.symbol),
                name: pair.base_name.clone().unwrap_or(placeholder.name),
                logo_uri: pair.image_url.clone(),
            };
        }

        TokenMetadata::placeholder(mint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMarket {
        list_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MarketDataSource for CountingMarket {
        async fn token_list(&self) -> Result<Vec<TokenListEntry>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("token list down"));
            }
            Ok(vec![TokenListEntry {
                address: "Listed".to_string(),
                symbol: "LST".to_string(),
                name: "Listed Token".to_string(),
                decimals: 6,
                logo_uri: Some("https://logo".to_string()),
            }])
        }

        async fn pairs(&self, _mint: &str) -> Result<Vec<MarketPair>> {
            Ok(vec![])
        }
    }

    fn resolver(fail: bool) -> (MetadataResolver, Arc<CountingMarket>) {
        let market = Arc::new(CountingMarket {
            list_calls: AtomicUsize::new(0),
            fail,
        });
        let resolver = MetadataResolver::new(market.clone(), Duration::from_secs(60), 4);
        (resolver, market)
    }

    #[tokio::test]
    async fn test_list_entry_wins_and_is_cached() {
        let (resolver, market) = resolver(false);

        let meta = resolver.resolve("Listed", &[]).await;
        assert_eq!(meta.symbol, "LST");
        assert_eq!(meta.logo_uri.as_deref(), Some("https://logo"));

        resolver.resolve("Other", &[]).await;
        assert_eq!(market.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pair_metadata_fallback() {
        let (resolver, _) = resolver(false);
        let pairs = vec![MarketPair {
            base_address: "PairMint".to_string(),
            base_symbol: Some("PAIR".to_string()),
            base_name: Some("Pair Token".to_string()),
            price_usd: Some(1.0),
            liquidity_usd: 10.0,
            image_url: Some("https://img".to_string()),
        }];

        let meta = resolver.resolve("PairMint", &pairs).await;
        assert_eq!(meta.symbol, "PAIR");
        assert_eq!(meta.name, "Pair Token");
    }

    #[tokio::test]
    async fn test_placeholder_when_unknown_and_failures_not_cached() {
        let (resolver, market) = resolver(true);

        let meta = resolver.resolve("abcdefgh", &[]).await;
        assert_eq!(meta, TokenMetadata::placeholder("abcdefgh"));
        assert_eq!(meta.symbol, "ABCD");
        assert_eq!(meta.name, "Unknown Token");

        resolver.resolve("abcdefgh", &[]).await;
        assert_eq!(market.list_calls.load(Ordering::SeqCst), 2);
    }
}
