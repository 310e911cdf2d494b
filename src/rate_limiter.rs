use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::key_generator::ClientIdentity;
use crate::metrics::MetricsCollector;
use crate::rate_limit_config::PolicyConfig;
use crate::response::apply_rate_limit_headers;
use crate::store::{CounterStore, Hit};

/// Outcome of counting one request against a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Within budget; forward downstream
    Allowed { key: String, hit: Hit },
    /// Over budget. The hit has already been counted.
    Rejected { key: String, hit: Hit },
    /// The store faulted; the request is let through uncounted
    FailedOpen,
}

/// One policy bound to the store that holds its counters.
///
/// Guards that share a store and derive the same key share a budget.
#[derive(Clone)]
pub struct LimiterGuard {
    policy: Arc<PolicyConfig>,
    store: Arc<dyn CounterStore>,
    metrics: MetricsCollector,
}

impl LimiterGuard {
    pub fn new(policy: PolicyConfig, store: Arc<dyn CounterStore>, metrics: MetricsCollector) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            metrics,
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Count one request from `identity` and decide whether it may proceed
    pub fn check(&self, identity: &ClientIdentity) -> Decision {
        let key = self.policy.key_strategy().generate_key(identity);

        let hit = match self.store.increment(&key, self.policy.window()) {
            Ok(hit) => hit,
            Err(e) => {
                error!(
                    target: "auth_throttle::limiter",
                    policy = self.policy.name(),
                    key = %key,
                    error = %e,
                    "Counter store fault, allowing request"
                );
                return Decision::FailedOpen;
            }
        };

        if hit.total_hits > self.policy.max_requests() {
            warn!(
                target: "auth_throttle::limiter",
                policy = self.policy.name(),
                key = %key,
                hits = hit.total_hits,
                limit = self.policy.max_requests(),
                "Rate limit exceeded"
            );
            Decision::Rejected { key, hit }
        } else {
            debug!(
                target: "auth_throttle::limiter",
                policy = self.policy.name(),
                key = %key,
                hits = hit.total_hits,
                limit = self.policy.max_requests(),
                "Request within budget"
            );
            Decision::Allowed { key, hit }
        }
    }

    /// Give the slot back when the policy does not count requests that
    /// finished with `status`. Returns whether a refund was made.
    ///
    /// The refund only applies to the window `hit` was counted in; once that
    /// window has rolled over there is nothing left to give back.
    pub fn settle(&self, key: &str, hit: &Hit, status: StatusCode) -> bool {
        if !self.policy.refunds(status.as_u16()) {
            return false;
        }

        match self.store.decrement_window(key, hit.reset_time) {
            Ok(true) => {
                debug!(
                    target: "auth_throttle::limiter",
                    policy = self.policy.name(),
                    key = %key,
                    status = status.as_u16(),
                    "Refunded rate limit slot"
                );
                true
            }
            Ok(false) => {
                debug!(
                    target: "auth_throttle::limiter",
                    policy = self.policy.name(),
                    key = %key,
                    "Window rolled over before refund, nothing to give back"
                );
                false
            }
            Err(e) => {
                error!(
                    target: "auth_throttle::limiter",
                    policy = self.policy.name(),
                    key = %key,
                    error = %e,
                    "Counter store fault while refunding"
                );
                false
            }
        }
    }

    /// Attach this policy's rate limit headers to an allowed response
    pub fn decorate(&self, headers: &mut HeaderMap, hit: &Hit) {
        apply_rate_limit_headers(
            headers,
            self.policy.headers(),
            self.policy.max_requests(),
            self.policy.window(),
            hit,
            false,
        );
    }

    /// Terminal response for an over-budget request
    pub fn reject(&self, hit: &Hit) -> Response {
        let mut response = self.policy.on_reject().respond();
        apply_rate_limit_headers(
            response.headers_mut(),
            self.policy.headers(),
            self.policy.max_requests(),
            self.policy.window(),
            hit,
            true,
        );
        response
    }
}
