use axum::http::header::{LOCATION, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use crate::error::{LimiterError, Result};
use crate::rate_limit_config::HeaderMode;
use crate::store::Hit;

/// Body sent with a structured rejection
#[derive(Debug, Serialize)]
pub struct RejectBody {
    pub success: bool,
    pub message: String,
}

/// Terminal action taken when a request is over budget.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectStrategy {
    /// `429` with a `{ success: false, message }` JSON body
    Structured { message: String },
    /// `302` to `<base>/login?error=<message>`, for browser navigations
    Redirect { login_url: Url, message: String },
}

impl RejectStrategy {
    pub fn structured(message: impl Into<String>) -> Self {
        RejectStrategy::Structured {
            message: message.into(),
        }
    }

    /// Build a redirect rejection against `base`, which must be an absolute
    /// http(s) URL.
    pub fn redirect(base: &str, message: impl Into<String>) -> Result<Self> {
        Ok(RejectStrategy::Redirect {
            login_url: login_url(base)?,
            message: message.into(),
        })
    }

    pub fn message(&self) -> &str {
        match self {
            RejectStrategy::Structured { message } => message,
            RejectStrategy::Redirect { message, .. } => message,
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> Result<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(LimiterError::Configuration(
                "Rejection message cannot be empty".to_string(),
            ));
        }
        Ok(match self {
            RejectStrategy::Structured { .. } => RejectStrategy::Structured { message },
            RejectStrategy::Redirect { login_url, .. } => {
                RejectStrategy::Redirect { login_url, message }
            }
        })
    }

    /// Where a redirect rejection sends the client
    pub fn location(&self) -> Option<Url> {
        match self {
            RejectStrategy::Structured { .. } => None,
            RejectStrategy::Redirect { login_url, message } => {
                let mut location = login_url.clone();
                location.query_pairs_mut().append_pair("error", message);
                Some(location)
            }
        }
    }

    /// Render the rejection. Never touches the counter.
    pub fn respond(&self) -> Response {
        match self {
            RejectStrategy::Structured { message } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RejectBody {
                    success: false,
                    message: message.clone(),
                }),
            )
                .into_response(),
            RejectStrategy::Redirect { .. } => {
                let location = self
                    .location()
                    .and_then(|url| HeaderValue::from_str(url.as_str()).ok());
                match location {
                    Some(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
                    None => StatusCode::TOO_MANY_REQUESTS.into_response(),
                }
            }
        }
    }
}

fn login_url(base: &str) -> Result<Url> {
    let base = base.trim().trim_end_matches('/');
    let url = Url::parse(&format!("{}/login", base)).map_err(|e| {
        LimiterError::Configuration(format!("Invalid redirect base '{}': {}", base, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(LimiterError::Configuration(format!(
            "Redirect base '{}' must use http or https",
            base
        )));
    }

    Ok(url)
}

/// Attach the policy's rate limit headers. On rejection `Retry-After` is
/// added as well.
pub fn apply_rate_limit_headers(
    headers: &mut HeaderMap,
    mode: HeaderMode,
    limit: u64,
    window: Duration,
    hit: &Hit,
    rejected: bool,
) {
    let now = SystemTime::now();
    let remaining = limit.saturating_sub(hit.total_hits);
    let reset_in = ceil_secs(hit.time_until_reset(now));

    match mode {
        HeaderMode::None => return,
        HeaderMode::Standard => {
            let policy = format!("{};w={}", limit, ceil_secs(window));
            if let Ok(policy) = HeaderValue::from_str(&policy) {
                headers.insert(HeaderName::from_static("ratelimit-policy"), policy);
            }
            headers.insert(HeaderName::from_static("ratelimit-limit"), HeaderValue::from(limit));
            headers.insert(
                HeaderName::from_static("ratelimit-remaining"),
                HeaderValue::from(remaining),
            );
            headers.insert(
                HeaderName::from_static("ratelimit-reset"),
                HeaderValue::from(reset_in),
            );
        }
        HeaderMode::Legacy => {
            let reset_at = hit
                .reset_time
                .duration_since(UNIX_EPOCH)
                .map(ceil_secs)
                .unwrap_or_default();
            headers.insert(HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from(limit));
            headers.insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from(remaining),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-reset"),
                HeaderValue::from(reset_at),
            );
        }
    }

    if rejected {
        headers.insert(RETRY_AFTER, HeaderValue::from(reset_in));
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIRECT_MESSAGE: &str =
        "Too many authentication attempts. Please try again after 5 minutes.";

    fn hit(total_hits: u64, reset_in: Duration) -> Hit {
        Hit {
            total_hits,
            reset_time: SystemTime::now() + reset_in,
        }
    }

    #[test]
    fn test_structured_rejection() {
        let response = RejectStrategy::structured("Too many attempts").respond();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_redirect_location_encodes_message() {
        let strategy = RejectStrategy::redirect("http://localhost:5173/", REDIRECT_MESSAGE).unwrap();
        let location = strategy.location().unwrap();

        assert_eq!(location.path(), "/login");
        assert!(location.as_str().starts_with("http://localhost:5173/login?error="));
        assert!(!location.as_str().contains(' '));

        let (name, value) = location.query_pairs().next().unwrap();
        assert_eq!(name, "error");
        assert_eq!(value, REDIRECT_MESSAGE);
    }

    #[test]
    fn test_redirect_response() {
        let strategy = RejectStrategy::redirect("https://app.example.com", REDIRECT_MESSAGE).unwrap();
        let response = strategy.respond();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://app.example.com/login?error="));
    }

    #[test]
    fn test_redirect_base_keeps_path_prefix() {
        let strategy = RejectStrategy::redirect("https://example.com/app", "nope").unwrap();
        assert_eq!(strategy.location().unwrap().path(), "/app/login");
    }

    #[test]
    fn test_invalid_redirect_base() {
        assert!(RejectStrategy::redirect("not a url", "x").is_err());
        assert!(RejectStrategy::redirect("ftp://files.example.com", "x").is_err());
    }

    #[test]
    fn test_with_message_keeps_variant() {
        let strategy = RejectStrategy::redirect("http://localhost:5173", "old")
            .unwrap()
            .with_message("new")
            .unwrap();
        assert!(matches!(strategy, RejectStrategy::Redirect { .. }));
        assert_eq!(strategy.message(), "new");
        assert!(RejectStrategy::structured("a").with_message("  ").is_err());
    }

    #[test]
    fn test_standard_headers() {
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(
            &mut headers,
            HeaderMode::Standard,
            3,
            Duration::from_secs(300),
            &hit(1, Duration::from_secs(120)),
            false,
        );

        assert_eq!(headers["ratelimit-policy"], "3;w=300");
        assert_eq!(headers["ratelimit-limit"], "3");
        assert_eq!(headers["ratelimit-remaining"], "2");
        let reset: u64 = headers["ratelimit-reset"].to_str().unwrap().parse().unwrap();
        assert!((119..=120).contains(&reset));
        assert!(headers.get("x-ratelimit-limit").is_none());
        assert!(headers.get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_legacy_headers_on_rejection() {
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(
            &mut headers,
            HeaderMode::Legacy,
            3,
            Duration::from_secs(300),
            &hit(4, Duration::from_secs(60)),
            true,
        );

        assert_eq!(headers["x-ratelimit-limit"], "3");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert!(headers.get("x-ratelimit-reset").is_some());
        assert!(headers.get("ratelimit-limit").is_none());
        assert!(headers.get(RETRY_AFTER).is_some());
    }

    #[test]
    fn test_no_headers() {
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(
            &mut headers,
            HeaderMode::None,
            3,
            Duration::from_secs(300),
            &hit(4, Duration::from_secs(60)),
            true,
        );
        assert!(headers.is_empty());
    }
}
