use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::{middleware::Next, response::Response};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::LimiterError;
use crate::key_generator::ClientIdentity;
use crate::metrics::Outcome;
use crate::rate_limiter::{Decision, LimiterGuard};

/// How many reverse proxies in front of the service are trusted to append
/// to `X-Forwarded-For`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedProxies {
    pub hops: usize,
}

/// Bearer token guarding the admin routes.
#[derive(Clone)]
pub struct AdminToken(Arc<str>);

impl AdminToken {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref().trim()))
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(..)")
    }
}

/// Check `Authorization: Bearer <token>` against the configured admin token
pub fn authorize_admin(headers: &HeaderMap, token: &AdminToken) -> Result<(), LimiterError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| LimiterError::Unauthorized("Missing authorization header".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            LimiterError::Unauthorized("Invalid authorization header format".to_string())
        })?;

    let matches: bool = token.0.as_bytes().ct_eq(presented.trim().as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err(LimiterError::Unauthorized("Invalid admin token".to_string()))
    }
}

/// Reject admin requests that do not carry the admin bearer token
pub async fn require_admin_token(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = authorize_admin(request.headers(), &token) {
        let client = request
            .extensions()
            .get::<ClientIdentity>()
            .cloned()
            .unwrap_or_else(ClientIdentity::unknown);
        warn!(
            target: "auth_throttle::middleware",
            client = %client,
            uri = %request.uri(),
            error = %e,
            "Rejected admin request"
        );
        return e.into_response();
    }

    next.run(request).await
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = Uuid::new_v4();
    let client = request
        .extensions()
        .get::<ClientIdentity>()
        .cloned()
        .unwrap_or_else(ClientIdentity::unknown);

    info!(
        target: "auth_throttle::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client = %client,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "auth_throttle::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

/// Resolve the caller's identity once and attach it as a request extension
pub async fn client_identity_middleware(
    State(proxies): State<TrustedProxies>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identity = resolve_client_identity(request.headers(), peer, proxies.hops);

    request.extensions_mut().insert(identity);
    next.run(request).await
}

/// Walk from the socket peer back through `X-Forwarded-For`, skipping
/// `trusted_hops` proxies. Stops at the left-most recorded address.
pub fn resolve_client_identity(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_hops: usize,
) -> ClientIdentity {
    let mut chain = vec![peer
        .map(|ip| ip.to_canonical().to_string())
        .unwrap_or_else(|| ClientIdentity::UNKNOWN.to_string())];

    if trusted_hops > 0 {
        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        chain.extend(forwarded.into_iter().rev());
    }

    let index = trusted_hops.min(chain.len() - 1);
    ClientIdentity::new(chain.swap_remove(index))
}

/// Run a request through a policy: reject it, or forward it and settle the
/// count once the downstream status is known.
pub async fn enforce_policy(
    State(guard): State<LimiterGuard>,
    request: Request,
    next: Next,
) -> Response {
    let identity = request
        .extensions()
        .get::<ClientIdentity>()
        .cloned()
        .unwrap_or_else(ClientIdentity::unknown);
    let policy = guard.policy().name().to_string();

    match guard.check(&identity) {
        Decision::Rejected { hit, .. } => {
            guard.metrics().record(&policy, Outcome::Rejected).await;
            guard.reject(&hit)
        }
        Decision::FailedOpen => {
            guard.metrics().record(&policy, Outcome::FailedOpen).await;
            next.run(request).await
        }
        Decision::Allowed { key, hit } => {
            guard.metrics().record(&policy, Outcome::Allowed).await;

            let mut response = next.run(request).await;
            guard.decorate(response.headers_mut(), &hit);

            if guard.settle(&key, &hit, response.status()) {
                guard.metrics().record(&policy, Outcome::Refunded).await;
            }
            response
        }
    }
}
