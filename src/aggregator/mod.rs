//! Quote/swap aggregator client.
//!
//! Quotes and swap transactions are requested from an ordered list of
//! Jupiter-compatible endpoints. Every call goes through the same
//! `FallbackPolicy`, with request pacing and endpoint health tracking layered
//! around it by `AggregatorClient`.

pub mod client;
pub mod fallback;
pub mod health;
pub mod pacer;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use client::AggregatorClient;
pub use fallback::{EndpointFailure, FallbackOutcome, FallbackPolicy};
pub use health::{EndpointHealthTracker, EndpointState};
pub use pacer::RequestPacer;
pub use transport::{HttpReply, HttpTransport, ReqwestTransport};

/// One aggregator deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorEndpoint {
    /// Label used in logs and health tracking
    pub name: String,
    pub quote_url: String,
    pub swap_url: String,
}

impl AggregatorEndpoint {
    pub fn new(name: impl Into<String>, quote_url: impl Into<String>, swap_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quote_url: quote_url.into(),
            swap_url: swap_url.into(),
        }
    }

    /// Public Jupiter deployments, most preferred first.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "jup-swap-v1",
                "https://api.jup.ag/swap/v1/quote",
                "https://api.jup.ag/swap/v1/swap",
            ),
            Self::new(
                "jup-v6",
                "https://quote-api.jup.ag/v6/quote",
                "https://quote-api.jup.ag/v6/swap",
            ),
            Self::new(
                "jupiterapi",
                "https://public.jupiterapi.com/quote",
                "https://public.jupiterapi.com/swap",
            ),
        ]
    }
}
