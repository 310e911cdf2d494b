use axum::{
    extract::{Path, State},
    http::Uri,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::LimiterError;
use crate::health::HealthChecker;
use crate::metrics::PolicyMetrics;
use crate::registry::{Policy, PolicyRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PolicyRegistry>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            health: Arc::new(HealthChecker::new(registry.clone())),
            registry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ForwardedResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: String,
    pub policy: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub policies: HashMap<String, PolicyMetrics>,
    pub tracked_keys: BTreeMap<String, usize>,
}

/// Stand-in for the business handler behind a guarded route. Reaching it
/// means the request was within budget.
pub async fn forwarded(uri: Uri) -> impl IntoResponse {
    Json(ForwardedResponse {
        success: true,
        message: format!("Forwarded to {}", uri.path()),
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health())
}

/// Per-policy decision counts and store sizes
pub async fn admin_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, LimiterError> {
    let tracked_keys = state
        .registry
        .tracked_keys()?
        .into_iter()
        .map(|(policy, keys)| (policy.to_string(), keys))
        .collect();

    Ok(Json(StatsResponse {
        policies: state.registry.metrics().snapshot().await,
        tracked_keys,
    }))
}

/// Manually unblock a key
pub async fn reset_key(
    State(state): State<AppState>,
    Path((policy, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, LimiterError> {
    let policy: Policy = policy.parse()?;
    state.registry.reset_key(policy, &key)?;

    Ok(Json(ResetResponse {
        status: "success".to_string(),
        policy: policy.to_string(),
        key,
    }))
}
