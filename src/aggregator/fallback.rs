//! Endpoint fallback shared by quote and swap-build calls.

use super::transport::HttpReply;
use super::AggregatorEndpoint;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

/// Why one endpoint attempt was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub reason: String,
    pub rate_limited: bool,
}

#[derive(Debug)]
pub enum FallbackOutcome<T> {
    /// An endpoint produced a valid value.
    Accepted {
        value: T,
        endpoint: String,
        failures: Vec<EndpointFailure>,
    },
    /// Every attempt failed.
    Exhausted {
        failures: Vec<EndpointFailure>,
        rounds: usize,
    },
}

impl<T> FallbackOutcome<T> {
    pub fn failures(&self) -> &[EndpointFailure] {
        match self {
            FallbackOutcome::Accepted { failures, .. } => failures,
            FallbackOutcome::Exhausted { failures, .. } => failures,
        }
    }
}

/// Summarize failures as `endpoint: reason; ...`.
pub fn describe_failures(failures: &[EndpointFailure]) -> String {
    if failures.is_empty() {
        return "no endpoints attempted".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.endpoint, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ordered endpoint fallback with rate-limit backoff.
///
/// Endpoints are tried in order until one returns a reply the validator
/// accepts. A 429 waits on an exponential schedule before moving on, and a
/// further round over the list only starts when the previous round was rate
/// limited somewhere.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    pub max_rounds: usize,
    /// First wait after a 429, doubling for each further one
    pub rate_limit_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            rate_limit_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl FallbackPolicy {
    pub fn new(max_rounds: usize, rate_limit_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
            rate_limit_backoff,
            max_backoff,
        }
    }

    /// Waits after successive 429s: `base`, `2 * base`, `4 * base`, ...
    /// capped at `max_backoff`.
    fn backoff_schedule(&self) -> impl Iterator<Item = Duration> {
        let factor = self.rate_limit_backoff.as_millis().max(1) as u64;
        let max_backoff = self.max_backoff;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .map(move |wait| (wait / 2).min(max_backoff))
    }

    /// Run `send` against each endpoint until `validate` accepts a reply.
    pub async fn execute<T, S, Fut, V>(
        &self,
        endpoints: &[AggregatorEndpoint],
        mut send: S,
        validate: V,
    ) -> FallbackOutcome<T>
    where
        S: FnMut(AggregatorEndpoint) -> Fut,
        Fut: Future<Output = anyhow::Result<HttpReply>>,
        V: Fn(&HttpReply) -> Result<T, String>,
    {
        let mut failures = Vec::new();
        let mut waits = self.backoff_schedule();

        for round in 1..=self.max_rounds {
            let mut rate_limited = false;

            for (idx, endpoint) in endpoints.iter().enumerate() {
                let last_attempt = round == self.max_rounds && idx + 1 == endpoints.len();
                let name = endpoint.name.clone();

                let failure = match send(endpoint.clone()).await {
                    Err(e) => EndpointFailure {
                        endpoint: name,
                        reason: format!("transport error: {:#}", e),
                        rate_limited: false,
                    },
                    Ok(reply) if reply.is_rate_limited() => {
                        rate_limited = true;
                        EndpointFailure {
                            endpoint: name,
                            reason: "rate limited (429)".to_string(),
                            rate_limited: true,
                        }
                    }
                    Ok(reply) if !reply.is_success() => EndpointFailure {
                        endpoint: name,
                        reason: match reply.error_message() {
                            Some(message) => format!("HTTP {}: {}", reply.status, message),
                            None => format!("HTTP {}", reply.status),
                        },
                        rate_limited: false,
                    },
                    Ok(reply) => match validate(&reply) {
                        Ok(value) => {
                            debug!("Endpoint {} accepted in round {}", name, round);
                            return FallbackOutcome::Accepted {
                                value,
                                endpoint: name,
                                failures,
                            };
                        }
                        Err(reason) => EndpointFailure {
                            endpoint: name,
                            reason,
                            rate_limited: false,
                        },
                    },
                };

                warn!("Endpoint {} failed: {}", failure.endpoint, failure.reason);
                let wait_needed = failure.rate_limited && !last_attempt;
                failures.push(failure);

                if wait_needed {
                    let wait = waits.next().unwrap_or(self.max_backoff);
                    debug!("Rate limited, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }

            if !rate_limited {
                return FallbackOutcome::Exhausted {
                    failures,
                    rounds: round,
                };
            }
        }

        FallbackOutcome::Exhausted {
            failures,
            rounds: self.max_rounds,
        }
    }
}
