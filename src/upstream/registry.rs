//! Upstream registry.
//!
//! # Responsibilities
//! - Build one `HttpUpstream` per configured upstream
//! - Hold exactly one circuit breaker per dependency name for the process lifetime
//! - Hand out breakers lazily for dependencies that are not configured

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{CircuitBreakerConfig, GuardConfig};
use crate::resilience::{BreakerSnapshot, CircuitBreaker};
use crate::upstream::http::{HttpUpstream, UpstreamError};

/// Named upstreams and their breakers.
#[derive(Debug, Default)]
pub struct UpstreamRegistry {
    upstreams: HashMap<String, Arc<HttpUpstream>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    breaker_defaults: CircuitBreakerConfig,
}

impl UpstreamRegistry {
    /// Create a registry from configuration.
    pub fn from_config(config: &GuardConfig) -> Result<Self, UpstreamError> {
        let registry = Self {
            upstreams: HashMap::new(),
            breakers: DashMap::new(),
            breaker_defaults: config.circuit_breaker.clone(),
        };
        let mut upstreams = HashMap::new();

        for upstream in &config.upstreams {
            let breaker_config = upstream.circuit_breaker_or(&config.circuit_breaker);
            let breaker = registry
                .breakers
                .entry(upstream.name.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::from_config(&upstream.name, breaker_config)))
                .clone();

            let http = HttpUpstream::from_config(
                upstream,
                breaker,
                &config.retry,
                &config.circuit_breaker,
            )?;
            tracing::info!(
                upstream = %upstream.name,
                base_url = %http.base_url(),
                failure_threshold = breaker_config.failure_threshold,
                "Upstream registered"
            );
            upstreams.insert(upstream.name.clone(), Arc::new(http));
        }

        Ok(Self {
            upstreams,
            ..registry
        })
    }

    /// Get a configured upstream by name.
    pub fn get(&self, name: &str) -> Option<Arc<HttpUpstream>> {
        self.upstreams.get(name).cloned()
    }

    /// Configured upstream names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.upstreams.keys().cloned().collect();
        names.sort();
        names
    }

    /// The breaker for `name`, created with the default settings on first use.
    pub fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return breaker.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::from_config(name, &self.breaker_defaults))
            })
            .clone()
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;

    fn config() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.upstreams.push(UpstreamConfig {
            name: "spotify".into(),
            base_url: "https://api.spotify.com/v1/".into(),
            request_timeout_ms: 5000,
            retry: None,
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            }),
        });
        config.upstreams.push(UpstreamConfig {
            name: "youtube".into(),
            base_url: "https://www.googleapis.com/youtube/v3/".into(),
            request_timeout_ms: 5000,
            retry: None,
            circuit_breaker: None,
        });
        config
    }

    #[test]
    fn test_one_breaker_per_upstream() {
        let registry = UpstreamRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.names(), vec!["spotify", "youtube"]);

        let spotify = registry.get("spotify").unwrap();
        assert!(Arc::ptr_eq(spotify.guard().breaker(), &registry.breaker_for("spotify")));
        assert_eq!(spotify.guard().breaker().failure_threshold(), 2);
        assert_eq!(registry.breaker_for("youtube").failure_threshold(), 5);
        assert!(registry.get("deezer").is_none());
    }

    #[test]
    fn test_lazy_breakers_are_reused() {
        let registry = UpstreamRegistry::from_config(&config()).unwrap();
        let a = registry.breaker_for("node-proxy");
        let b = registry.breaker_for("node-proxy");
        assert!(Arc::ptr_eq(&a, &b));

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["node-proxy", "spotify", "youtube"]);
    }
}
