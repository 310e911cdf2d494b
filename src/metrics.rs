use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Decision counts for one policy since process start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyMetrics {
    pub allowed: u64,
    pub rejected: u64,
    pub refunded: u64,
    pub failed_open: u64,
}

/// What happened to a single request at a guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Rejected,
    Refunded,
    FailedOpen,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    policy_metrics: Arc<RwLock<HashMap<String, PolicyMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, policy: &str, outcome: Outcome) {
        let mut metrics = self.policy_metrics.write().await;
        let policy_metrics = metrics.entry(policy.to_string()).or_default();

        match outcome {
            Outcome::Allowed => policy_metrics.allowed += 1,
            Outcome::Rejected => policy_metrics.rejected += 1,
            Outcome::Refunded => policy_metrics.refunded += 1,
            Outcome::FailedOpen => policy_metrics.failed_open += 1,
        }
    }

    pub async fn get_policy_metrics(&self, policy: &str) -> Option<PolicyMetrics> {
        let metrics = self.policy_metrics.read().await;
        metrics.get(policy).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, PolicyMetrics> {
        let metrics = self.policy_metrics.read().await;
        metrics.clone()
    }
}
