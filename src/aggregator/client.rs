//! Aggregator client: quotes and swap transaction builds.

use super::fallback::{describe_failures, FallbackOutcome, FallbackPolicy};
use super::health::EndpointHealthTracker;
use super::pacer::RequestPacer;
use super::transport::{HttpReply, HttpTransport};
use super::AggregatorEndpoint;
use crate::config::AggregatorConfig;
use crate::error::SweepError;
use crate::types::SwapQuote;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nonempty::NonEmpty;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Client for a Jupiter-compatible quote/swap API.
///
/// The client never sees commission settings; fees are settled separately
/// after the sweep.
pub struct AggregatorClient {
    endpoints: NonEmpty<AggregatorEndpoint>,
    transport: Arc<dyn HttpTransport>,
    policy: FallbackPolicy,
    health: Arc<Mutex<EndpointHealthTracker>>,
    pacer: Arc<Mutex<RequestPacer>>,
}

impl AggregatorClient {
    pub fn new(config: &AggregatorConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, SweepError> {
        let endpoints = NonEmpty::from_vec(config.endpoints.clone())
            .ok_or_else(|| SweepError::Config("aggregator endpoint list is empty".to_string()))?;

        let policy = FallbackPolicy::new(
            config.max_rounds,
            Duration::from_millis(config.rate_limit_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        );

        let health = EndpointHealthTracker::new(
            config.circuit_breaker_failure_threshold,
            Duration::from_secs(config.circuit_breaker_cooldown_seconds),
        );

        info!("Created aggregator client with {} endpoints", endpoints.len());

        Ok(Self {
            endpoints,
            transport,
            policy,
            health: Arc::new(Mutex::new(health)),
            pacer: Arc::new(Mutex::new(RequestPacer::new(config.requests_per_second))),
        })
    }

    /// Request a fresh quote for `amount` smallest units of `input_mint`.
    #[instrument(skip(self), fields(input = %input_mint))]
    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote, SweepError> {
        let query = vec![
            ("inputMint".to_string(), input_mint.to_string()),
            ("outputMint".to_string(), output_mint.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("slippageBps".to_string(), slippage_bps.to_string()),
        ];

        let endpoints = self.ordered_endpoints().await;
        let transport = self.transport.clone();
        let pacer = self.pacer.clone();

        let outcome = self
            .policy
            .execute(
                &endpoints,
                |endpoint| {
                    let transport = transport.clone();
                    let pacer = pacer.clone();
                    let query = query.clone();
                    async move {
                        pacer.lock().await.until_ready().await;
                        transport.get(&endpoint.quote_url, &query).await
                    }
                },
                |reply| parse_quote(reply, input_mint, output_mint, amount, slippage_bps),
            )
            .await;

        self.record_outcome(&outcome).await;

        match outcome {
            FallbackOutcome::Accepted { value, endpoint, .. } => {
                debug!("Quote for {}: {} -> {} lamports via {}", input_mint, amount, value.out_amount, endpoint);
                Ok(value)
            }
            FallbackOutcome::Exhausted { failures, rounds } => {
                warn!("No quote for {} after {} round(s)", input_mint, rounds);
                Err(SweepError::NoLiquidity(describe_failures(&failures)))
            }
        }
    }

    /// Build the unsigned swap transaction for a quote.
    ///
    /// The quote is consumed; on failure it is discarded and a new quote must
    /// be requested for any retry.
    #[instrument(skip(self, quote), fields(input = %quote.input_mint))]
    pub async fn build_swap_transaction(
        &self,
        quote: SwapQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, SweepError> {
        let input_mint = quote.input_mint.clone();
        let body = swap_request_body(quote, user);

        let endpoints = self.ordered_endpoints().await;
        let transport = self.transport.clone();
        let pacer = self.pacer.clone();

        let outcome = self
            .policy
            .execute(
                &endpoints,
                |endpoint| {
                    let transport = transport.clone();
                    let pacer = pacer.clone();
                    let body = body.clone();
                    async move {
                        pacer.lock().await.until_ready().await;
                        transport.post_json(&endpoint.swap_url, &body).await
                    }
                },
                parse_swap_transaction,
            )
            .await;

        self.record_outcome(&outcome).await;

        match outcome {
            FallbackOutcome::Accepted { value, endpoint, .. } => {
                debug!("Built swap transaction for {} via {}", input_mint, endpoint);
                Ok(value)
            }
            FallbackOutcome::Exhausted { failures, .. } => {
                warn!("Swap build failed for {}", input_mint);
                Err(SweepError::BuildFailure(describe_failures(&failures)))
            }
        }
    }

    async fn ordered_endpoints(&self) -> Vec<AggregatorEndpoint> {
        self.health.lock().await.order(self.endpoints.iter())
    }

    async fn record_outcome<T>(&self, outcome: &FallbackOutcome<T>) {
        let mut health = self.health.lock().await;
        let mut pacer = self.pacer.lock().await;

        for failure in outcome.failures() {
            health.record_failure(&failure.endpoint);
            if failure.rate_limited {
                pacer.record_rate_limited();
            }
        }
        if let FallbackOutcome::Accepted { endpoint, .. } = outcome {
            health.record_success(endpoint);
            pacer.record_success();
        }
    }
}

/// Validate a quote reply: a JSON object with a parseable `outAmount`.
fn parse_quote(
    reply: &HttpReply,
    input_mint: &str,
    output_mint: &str,
    amount: u64,
    slippage_bps: u16,
) -> Result<SwapQuote, String> {
    let route = reply.json()?;

    if let Some(error) = route.get("error") {
        return Err(format!("aggregator error: {}", value_text(error)));
    }

    let out_amount = route
        .get("outAmount")
        .and_then(parse_amount)
        .ok_or_else(|| "quote missing outAmount".to_string())?;

    Ok(SwapQuote {
        input_mint: input_mint.to_string(),
        output_mint: output_mint.to_string(),
        in_amount: amount,
        out_amount,
        slippage_bps,
        route,
    })
}

/// Amounts arrive as decimal strings; some deployments send numbers.
fn parse_amount(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// POST body for the swap endpoint. Any platform fee in the quote is dropped.
fn swap_request_body(quote: SwapQuote, user: &Pubkey) -> Value {
    let mut route = quote.route;
    if let Some(fields) = route.as_object_mut() {
        fields.remove("platformFee");
    }
    json!({
        "quoteResponse": route,
        "userPublicKey": user.to_string(),
        "wrapAndUnwrapSol": true,
        "dynamicComputeUnitLimit": true,
    })
}

fn parse_swap_transaction(reply: &HttpReply) -> Result<VersionedTransaction, String> {
    let body = reply.json()?;
    let encoded = body
        .get("swapTransaction")
        .and_then(Value::as_str)
        .ok_or_else(|| "response missing swapTransaction".to_string())?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| format!("swapTransaction is not base64: {}", e))?;
    bincode::deserialize::<VersionedTransaction>(&bytes)
        .map_err(|e| format!("swapTransaction does not decode: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SOL_MINT;

    fn quote_with_fee() -> SwapQuote {
        SwapQuote {
            input_mint: "MintA".to_string(),
            output_mint: SOL_MINT.to_string(),
            in_amount: 1_000,
            out_amount: 50,
            slippage_bps: 500,
            route: json!({
                "inAmount": "1000",
                "outAmount": "50",
                "platformFee": {"amount": "1", "feeBps": 20},
                "routePlan": [],
            }),
        }
    }

    #[test]
    fn test_parse_quote_accepts_string_amount() {
        let reply = HttpReply::json_ok(&json!({"outAmount": "12345", "routePlan": []}));
        let quote = parse_quote(&reply, "MintA", SOL_MINT, 99, 500).unwrap();
        assert_eq!(quote.out_amount, 12_345);
        assert_eq!(quote.in_amount, 99);
        assert_eq!(quote.output_mint, SOL_MINT);
    }

    #[test]
    fn test_parse_quote_rejects_missing_out_amount() {
        let reply = HttpReply::json_ok(&json!({"routePlan": []}));
        assert!(parse_quote(&reply, "MintA", SOL_MINT, 1, 500).is_err());
    }

    #[test]
    fn test_parse_quote_surfaces_aggregator_error() {
        let reply = HttpReply::json_ok(&json!({"error": "Could not find any route", "errorCode": "COULD_NOT_FIND_ANY_ROUTE"}));
        let err = parse_quote(&reply, "MintA", SOL_MINT, 1, 500).unwrap_err();
        assert!(err.contains("Could not find any route"));
    }

    #[test]
    fn test_swap_body_strips_platform_fee() {
        let user = Pubkey::new_unique();
        let body = swap_request_body(quote_with_fee(), &user);

        assert!(body["quoteResponse"].get("platformFee").is_none());
        assert_eq!(body["quoteResponse"]["outAmount"], "50");
        assert_eq!(body["userPublicKey"], user.to_string());
        assert_eq!(body["wrapAndUnwrapSol"], true);
        assert_eq!(body["dynamicComputeUnitLimit"], true);
    }

    #[test]
    fn test_parse_swap_transaction_rejects_garbage() {
        let reply = HttpReply::json_ok(&json!({"swapTransaction": "not base64!!"}));
        assert!(parse_swap_transaction(&reply).unwrap_err().contains("base64"));

        let reply = HttpReply::json_ok(&json!({"swapTransaction": STANDARD.encode([1u8, 2, 3])}));
        assert!(parse_swap_transaction(&reply).unwrap_err().contains("decode"));

        let reply = HttpReply::json_ok(&json!({}));
        assert!(parse_swap_transaction(&reply).is_err());
    }

    #[test]
    fn test_empty_endpoint_list_rejected() {
        struct NoTransport;

        #[async_trait::async_trait]
        impl HttpTransport for NoTransport {
            async fn get(&self, _: &str, _: &[(String, String)]) -> anyhow::Result<HttpReply> {
                anyhow::bail!("unused")
            }
            async fn post_json(&self, _: &str, _: &Value) -> anyhow::Result<HttpReply> {
                anyhow::bail!("unused")
            }
        }

        let config = AggregatorConfig {
            endpoints: vec![],
            ..AggregatorConfig::default()
        };
        assert!(matches!(
            AggregatorClient::new(&config, Arc::new(NoTransport)),
            Err(SweepError::Config(_))
        ));
    }
}
