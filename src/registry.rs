//! The fixed set of named policies and the stores behind them.
//!
//! `auth` and `oauth` are built independently but hold the same store and
//! the same `auth_` key namespace, so password logins, signups and OAuth
//! initiations from one client draw on a single budget. `general` and
//! `strict` each get a store of their own.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{LimiterError, Result};
use crate::key_generator::KeyStrategy;
use crate::metrics::MetricsCollector;
use crate::rate_limit_config::{PolicyConfig, PolicyOverrides};
use crate::rate_limiter::LimiterGuard;
use crate::response::RejectStrategy;
use crate::store::{CounterStore, MemoryStore};

pub const AUTH_NAMESPACE: &str = "auth";

const AUTH_MESSAGE: &str =
    "Too many authentication attempts from this IP, please try again later.";
const OAUTH_MESSAGE: &str = "Too many authentication attempts. Please try again after 5 minutes.";
const GENERAL_MESSAGE: &str = "Too many requests from this IP, please try again after 15 minutes.";
const STRICT_MESSAGE: &str = "Too many attempts from this IP, please try again after 1 hour.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Auth,
    Oauth,
    General,
    Strict,
}

impl Policy {
    pub const ALL: [Policy; 4] = [Policy::Auth, Policy::Oauth, Policy::General, Policy::Strict];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Auth => "auth",
            Policy::Oauth => "oauth",
            Policy::General => "general",
            Policy::Strict => "strict",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        Policy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| LimiterError::InvalidRequest(format!("Unknown policy '{}'", s)))
    }
}

pub struct PolicyRegistry {
    auth: LimiterGuard,
    oauth: LimiterGuard,
    general: LimiterGuard,
    strict: LimiterGuard,
    metrics: MetricsCollector,
}

impl PolicyRegistry {
    /// Build the four policies with their default parameters
    pub fn new(redirect_base: &str) -> Result<Self> {
        Self::with_overrides(redirect_base, &PolicyOverrides::default())
    }

    /// Build the four policies, applying deployment overrides on top of the
    /// defaults. `redirect_base` is where `oauth` rejections send the browser.
    pub fn with_overrides(redirect_base: &str, overrides: &PolicyOverrides) -> Result<Self> {
        for name in overrides.policy_names() {
            if name.parse::<Policy>().is_err() {
                return Err(LimiterError::Configuration(format!(
                    "Policy file names unknown policy '{}'",
                    name
                )));
            }
        }

        let metrics = MetricsCollector::new();
        let auth_store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());

        let build = |policy: Policy, config: PolicyConfig| match overrides.get(policy.as_str()) {
            Some(policy_override) => config.with_override(policy_override),
            None => Ok(config),
        };

        let auth = build(
            Policy::Auth,
            PolicyConfig::new(
                Policy::Auth.as_str(),
                Duration::from_secs(5 * 60),
                3,
                RejectStrategy::structured(AUTH_MESSAGE),
            )?
            .with_key_strategy(KeyStrategy::namespaced(AUTH_NAMESPACE)),
        )?;

        let oauth = build(
            Policy::Oauth,
            PolicyConfig::new(
                Policy::Oauth.as_str(),
                Duration::from_secs(5 * 60),
                3,
                RejectStrategy::redirect(redirect_base, OAUTH_MESSAGE)?,
            )?
            .with_key_strategy(KeyStrategy::namespaced(AUTH_NAMESPACE)),
        )?;

        let general = build(
            Policy::General,
            PolicyConfig::new(
                Policy::General.as_str(),
                Duration::from_secs(15 * 60),
                100,
                RejectStrategy::structured(GENERAL_MESSAGE),
            )?,
        )?;

        let strict = build(
            Policy::Strict,
            PolicyConfig::new(
                Policy::Strict.as_str(),
                Duration::from_secs(60 * 60),
                3,
                RejectStrategy::structured(STRICT_MESSAGE),
            )?,
        )?;

        if auth.window() != oauth.window() || auth.max_requests() != oauth.max_requests() {
            warn!(
                target: "auth_throttle::registry",
                auth_window = ?auth.window(),
                oauth_window = ?oauth.window(),
                auth_limit = auth.max_requests(),
                oauth_limit = oauth.max_requests(),
                "auth and oauth share a counter but have different windows or budgets"
            );
        }

        let registry = Self {
            auth: LimiterGuard::new(auth, auth_store.clone(), metrics.clone()),
            oauth: LimiterGuard::new(oauth, auth_store, metrics.clone()),
            general: LimiterGuard::new(general, Arc::new(MemoryStore::new()), metrics.clone()),
            strict: LimiterGuard::new(strict, Arc::new(MemoryStore::new()), metrics.clone()),
            metrics,
        };

        for policy in Policy::ALL {
            let config = registry.guard(policy).policy();
            info!(
                target: "auth_throttle::registry",
                policy = %policy,
                window = %humantime::format_duration(config.window()),
                limit = config.max_requests(),
                headers = ?config.headers(),
                "Rate limit policy active"
            );
        }

        Ok(registry)
    }

    pub fn guard(&self, policy: Policy) -> &LimiterGuard {
        match policy {
            Policy::Auth => &self.auth,
            Policy::Oauth => &self.oauth,
            Policy::General => &self.general,
            Policy::Strict => &self.strict,
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Manually unblock `key` in the store behind `policy`. For `auth` and
    /// `oauth` this clears the shared counter.
    pub fn reset_key(&self, policy: Policy, key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(LimiterError::InvalidRequest(
                "Rate limit key cannot be empty".to_string(),
            ));
        }

        self.guard(policy).store().reset_key(key)?;
        info!(
            target: "auth_throttle::registry",
            policy = %policy,
            key = %key,
            "Rate limit key reset"
        );
        Ok(())
    }

    /// Every distinct store, each listed once
    fn stores(&self) -> Vec<(Policy, &Arc<dyn CounterStore>)> {
        let mut stores: Vec<(Policy, &Arc<dyn CounterStore>)> = Vec::new();
        for policy in Policy::ALL {
            let store = self.guard(policy).store();
            if !stores.iter().any(|(_, seen)| Arc::ptr_eq(seen, store)) {
                stores.push((policy, store));
            }
        }
        stores
    }

    /// Drop elapsed windows from every store. Faults are logged and skipped.
    pub fn sweep_expired(&self) -> usize {
        self.stores()
            .into_iter()
            .map(|(policy, store)| match store.sweep_expired() {
                Ok(removed) => removed,
                Err(e) => {
                    error!(
                        target: "auth_throttle::registry",
                        policy = %policy,
                        error = %e,
                        "Sweep failed"
                    );
                    0
                }
            })
            .sum()
    }

    /// Keys held per distinct store, labelled by the first policy using it
    pub fn tracked_keys(&self) -> Result<Vec<(Policy, usize)>> {
        self.stores()
            .into_iter()
            .map(|(policy, store)| Ok((policy, store.tracked_keys()?)))
            .collect()
    }
}

/// Periodically sweep expired windows. A zero interval disables the task.
pub fn start_sweep_task(registry: Arc<PolicyRegistry>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!(target: "auth_throttle::registry", "Counter sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_expired();
            if removed > 0 {
                info!(target: "auth_throttle::registry", removed, "Swept expired rate limit entries");
            } else {
                debug!(target: "auth_throttle::registry", "Sweep found nothing to remove");
            }
        }
    }))
}
