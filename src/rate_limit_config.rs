use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{LimiterError, Result};
use crate::key_generator::KeyStrategy;
use crate::response::RejectStrategy;

/// Which rate limit header set a policy exposes. The sets are mutually
/// exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// `RateLimit-Policy`, `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset`
    #[default]
    Standard,
    /// `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
    Legacy,
    None,
}

/// One validated, immutable rate limiting policy
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    name: String,
    window: Duration,
    max_requests: u64,
    key_strategy: KeyStrategy,
    skip_successful_requests: bool,
    skip_failed_requests: bool,
    headers: HeaderMode,
    on_reject: RejectStrategy,
}

impl PolicyConfig {
    /// Create a policy, rejecting a zero window or a zero budget
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        max_requests: u64,
        on_reject: RejectStrategy,
    ) -> Result<Self> {
        let name = name.into();
        validate_policy(&name, window, max_requests)?;

        Ok(Self {
            name,
            window,
            max_requests,
            key_strategy: KeyStrategy::default(),
            skip_successful_requests: false,
            skip_failed_requests: false,
            headers: HeaderMode::default(),
            on_reject,
        })
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMode) -> Self {
        self.headers = headers;
        self
    }

    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful_requests = skip;
        self
    }

    pub fn skip_failed_requests(mut self, skip: bool) -> Self {
        self.skip_failed_requests = skip;
        self
    }

    /// Apply deployment overrides, re-validating the result
    pub fn with_override(self, policy_override: &PolicyOverride) -> Result<Self> {
        let window = policy_override.window.unwrap_or(self.window);
        let max_requests = policy_override.max_requests.unwrap_or(self.max_requests);
        validate_policy(&self.name, window, max_requests)?;

        let on_reject = match &policy_override.message {
            Some(message) => self.on_reject.with_message(message)?,
            None => self.on_reject,
        };

        Ok(Self {
            window,
            max_requests,
            headers: policy_override.headers.unwrap_or(self.headers),
            skip_successful_requests: policy_override
                .skip_successful_requests
                .unwrap_or(self.skip_successful_requests),
            skip_failed_requests: policy_override
                .skip_failed_requests
                .unwrap_or(self.skip_failed_requests),
            on_reject,
            ..self
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    pub fn headers(&self) -> HeaderMode {
        self.headers
    }

    pub fn on_reject(&self) -> &RejectStrategy {
        &self.on_reject
    }

    /// Whether a forwarded request that finished with `status` gives its slot back
    pub fn refunds(&self, status: u16) -> bool {
        if status < 400 {
            self.skip_successful_requests
        } else {
            self.skip_failed_requests
        }
    }
}

fn validate_policy(name: &str, window: Duration, max_requests: u64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LimiterError::Configuration(
            "Policy name cannot be empty".to_string(),
        ));
    }
    if window.is_zero() {
        return Err(LimiterError::Configuration(format!(
            "Policy '{}': window must be greater than 0",
            name
        )));
    }
    if max_requests == 0 {
        return Err(LimiterError::Configuration(format!(
            "Policy '{}': max requests must be greater than 0",
            name
        )));
    }
    Ok(())
}

/// Deployment-level adjustments to a built-in policy. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    #[serde(default, with = "humantime_serde")]
    pub window: Option<Duration>,
    pub max_requests: Option<u64>,
    pub headers: Option<HeaderMode>,
    pub skip_successful_requests: Option<bool>,
    pub skip_failed_requests: Option<bool>,
    pub message: Option<String>,
}

/// Overrides keyed by policy name, as read from the policy file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct PolicyOverrides {
    pub policies: HashMap<String, PolicyOverride>,
}

impl PolicyOverrides {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn get(&self, policy: &str) -> Option<&PolicyOverride> {
        self.policies.get(policy)
    }

    /// Policy names present in the file, for checking against known policies
    pub fn policy_names(&self) -> Vec<&String> {
        self.policies.keys().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured() -> RejectStrategy {
        RejectStrategy::structured("Too many requests")
    }

    #[test]
    fn test_valid_policy_defaults() {
        let policy = PolicyConfig::new("general", Duration::from_secs(900), 100, structured()).unwrap();
        assert_eq!(policy.name(), "general");
        assert_eq!(policy.max_requests(), 100);
        assert_eq!(policy.headers(), HeaderMode::Standard);
        assert_eq!(policy.key_strategy(), &KeyStrategy::ClientIdentity);
        assert!(!policy.refunds(200));
        assert!(!policy.refunds(500));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let err = PolicyConfig::new("auth", Duration::ZERO, 3, structured()).unwrap_err();
        assert!(matches!(err, LimiterError::Configuration(_)));
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let err = PolicyConfig::new("auth", Duration::from_secs(300), 0, structured()).unwrap_err();
        assert!(matches!(err, LimiterError::Configuration(_)));
    }

    #[test]
    fn test_refund_rules_split_on_400() {
        let policy = PolicyConfig::new("p", Duration::from_secs(60), 5, structured())
            .unwrap()
            .skip_successful_requests(true);
        assert!(policy.refunds(200));
        assert!(policy.refunds(302));
        assert!(!policy.refunds(400));

        let policy = PolicyConfig::new("p", Duration::from_secs(60), 5, structured())
            .unwrap()
            .skip_failed_requests(true);
        assert!(!policy.refunds(399));
        assert!(policy.refunds(401));
        assert!(policy.refunds(503));
    }

    #[test]
    fn test_overrides_parse_humantime_windows() {
        let overrides = PolicyOverrides::from_json(
            r#"{
                "auth": { "window": "10m", "max_requests": 5 },
                "general": { "headers": "legacy", "skip_failed_requests": true }
            }"#,
        )
        .unwrap();

        let auth = overrides.get("auth").unwrap();
        assert_eq!(auth.window, Some(Duration::from_secs(600)));
        assert_eq!(auth.max_requests, Some(5));

        let general = overrides.get("general").unwrap();
        assert_eq!(general.headers, Some(HeaderMode::Legacy));
        assert_eq!(general.skip_failed_requests, Some(true));
        assert_eq!(general.window, None);
    }

    #[test]
    fn test_unknown_override_field_is_rejected() {
        let err = PolicyOverrides::from_json(r#"{ "auth": { "max": 5 } }"#).unwrap_err();
        assert!(matches!(err, LimiterError::PolicyFile(_)));
    }

    #[test]
    fn test_override_is_revalidated() {
        let policy = PolicyConfig::new("strict", Duration::from_secs(3600), 3, structured()).unwrap();
        let bad = PolicyOverride {
            max_requests: Some(0),
            ..Default::default()
        };
        assert!(policy.with_override(&bad).is_err());
    }

    #[test]
    fn test_override_replaces_only_given_fields() {
        let policy = PolicyConfig::new("strict", Duration::from_secs(3600), 3, structured())
            .unwrap()
            .with_key_strategy(KeyStrategy::namespaced("strict"));
        let policy = policy
            .with_override(&PolicyOverride {
                max_requests: Some(10),
                headers: Some(HeaderMode::None),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(policy.window(), Duration::from_secs(3600));
        assert_eq!(policy.max_requests(), 10);
        assert_eq!(policy.headers(), HeaderMode::None);
        assert_eq!(policy.key_strategy(), &KeyStrategy::namespaced("strict"));
    }
}
