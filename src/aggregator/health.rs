//! Circuit breaker for aggregator endpoint health.
//!
//! Endpoints that keep failing are demoted to the end of the fallback order
//! while they cool down. They are never removed, so a call always has every
//! endpoint to fall back on.

use super::AggregatorEndpoint;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// State of an endpoint in the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Endpoint is healthy and can be used
    Healthy,
    /// Endpoint has failed repeatedly but is still tried in order
    Degraded,
    /// Endpoint is tried only after every other endpoint
    CoolingDown,
}

#[derive(Debug, Clone)]
struct EndpointHealth {
    state: EndpointState,
    consecutive_failures: u32,
    cooldown_start: Option<Instant>,
}

impl EndpointHealth {
    fn new() -> Self {
        Self {
            state: EndpointState::Healthy,
            consecutive_failures: 0,
            cooldown_start: None,
        }
    }
}

/// Tracks consecutive failures per endpoint name.
pub struct EndpointHealthTracker {
    endpoint_health: HashMap<String, EndpointHealth>,
    /// Failures before an endpoint is marked degraded; twice this starts a cooldown
    failure_threshold: u32,
    cooldown_duration: Duration,
}

impl EndpointHealthTracker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            endpoint_health: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown_duration: cooldown,
        }
    }

    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub fn record_success(&mut self, endpoint: &str) {
        let health = self
            .endpoint_health
            .entry(endpoint.to_string())
            .or_insert_with(EndpointHealth::new);

        if health.state != EndpointState::Healthy {
            debug!("Endpoint {} recovered to healthy state", endpoint);
        }
        health.state = EndpointState::Healthy;
        health.consecutive_failures = 0;
        health.cooldown_start = None;
    }

    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub fn record_failure(&mut self, endpoint: &str) {
        let threshold = self.failure_threshold;
        let health = self
            .endpoint_health
            .entry(endpoint.to_string())
            .or_insert_with(EndpointHealth::new);

        health.consecutive_failures += 1;

        match health.state {
            EndpointState::Healthy if health.consecutive_failures >= threshold => {
                health.state = EndpointState::Degraded;
                debug!("Endpoint {} degraded: {} consecutive failures", endpoint, health.consecutive_failures);
            }
            EndpointState::Degraded if health.consecutive_failures >= threshold * 2 => {
                health.state = EndpointState::CoolingDown;
                health.cooldown_start = Some(Instant::now());
                warn!("Endpoint {} entering cooldown after {} failures", endpoint, health.consecutive_failures);
            }
            _ => {}
        }
    }

    /// Whether an endpoint is outside its cooldown.
    pub fn is_available(&mut self, endpoint: &str) -> bool {
        let cooldown = self.cooldown_duration;
        let Some(health) = self.endpoint_health.get_mut(endpoint) else {
            return true;
        };

        if health.state != EndpointState::CoolingDown {
            return true;
        }

        match health.cooldown_start {
            Some(start) if start.elapsed() < cooldown => false,
            _ => {
                health.state = EndpointState::Degraded;
                health.cooldown_start = None;
                health.consecutive_failures = 0;
                debug!("Endpoint {} cooldown expired, moving to degraded state", endpoint);
                true
            }
        }
    }

    pub fn state(&self, endpoint: &str) -> EndpointState {
        self.endpoint_health
            .get(endpoint)
            .map(|h| h.state)
            .unwrap_or(EndpointState::Healthy)
    }

    /// Endpoints in configured order with cooling endpoints moved last.
    pub fn order<'a, I>(&mut self, endpoints: I) -> Vec<AggregatorEndpoint>
    where
        I: IntoIterator<Item = &'a AggregatorEndpoint>,
    {
        let mut available = Vec::new();
        let mut cooling = Vec::new();
        for endpoint in endpoints {
            if self.is_available(&endpoint.name) {
                available.push(endpoint.clone());
            } else {
                cooling.push(endpoint.clone());
            }
        }
        available.extend(cooling);
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<AggregatorEndpoint> {
        vec![
            AggregatorEndpoint::new("a", "qa", "sa"),
            AggregatorEndpoint::new("b", "qb", "sb"),
        ]
    }

    #[test]
    fn test_degrades_then_cools_down() {
        let mut tracker = EndpointHealthTracker::new(2, Duration::from_secs(60));

        tracker.record_failure("a");
        assert_eq!(tracker.state("a"), EndpointState::Healthy);
        tracker.record_failure("a");
        assert_eq!(tracker.state("a"), EndpointState::Degraded);
        assert!(tracker.is_available("a"));

        tracker.record_failure("a");
        tracker.record_failure("a");
        assert_eq!(tracker.state("a"), EndpointState::CoolingDown);
        assert!(!tracker.is_available("a"));
    }

    #[test]
    fn test_success_resets() {
        let mut tracker = EndpointHealthTracker::new(1, Duration::from_secs(60));
        tracker.record_failure("a");
        tracker.record_failure("a");
        assert_eq!(tracker.state("a"), EndpointState::CoolingDown);

        tracker.record_success("a");
        assert_eq!(tracker.state("a"), EndpointState::Healthy);
        assert!(tracker.is_available("a"));
    }

    #[test]
    fn test_cooldown_expiry() {
        let mut tracker = EndpointHealthTracker::new(1, Duration::from_millis(0));
        tracker.record_failure("a");
        tracker.record_failure("a");
        assert!(tracker.is_available("a"));
        assert_eq!(tracker.state("a"), EndpointState::Degraded);
    }

    #[test]
    fn test_order_demotes_cooling_endpoints() {
        let mut tracker = EndpointHealthTracker::new(1, Duration::from_secs(60));
        tracker.record_failure("a");
        tracker.record_failure("a");

        let ordered = tracker.order(&endpoints());
        let names: Vec<_> = ordered.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_unknown_endpoint_is_healthy() {
        let mut tracker = EndpointHealthTracker::new(3, Duration::from_secs(60));
        assert_eq!(tracker.state("x"), EndpointState::Healthy);
        assert!(tracker.is_available("x"));
    }
}
