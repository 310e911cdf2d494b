use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::registry::PolicyRegistry;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub counters: CounterStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CounterStatus {
    pub status: String,
    /// Keys held per store, labelled by the first policy using it
    pub tracked_keys: BTreeMap<String, usize>,
    pub error: Option<String>,
}

pub struct HealthChecker {
    registry: Arc<PolicyRegistry>,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }

    pub fn check_health(&self) -> HealthStatus {
        let counters = self.check_counters();

        // A faulted store still lets traffic through, so the service is
        // degraded rather than down.
        let overall_status = if counters.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            counters,
        }
    }

    fn check_counters(&self) -> CounterStatus {
        match self.registry.tracked_keys() {
            Ok(tracked) => CounterStatus {
                status: "healthy".to_string(),
                tracked_keys: tracked
                    .into_iter()
                    .map(|(policy, keys)| (policy.to_string(), keys))
                    .collect(),
                error: None,
            },
            Err(e) => CounterStatus {
                status: "faulted".to_string(),
                tracked_keys: BTreeMap::new(),
                error: Some(e.to_string()),
            },
        }
    }
}
