use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::LimiterError;

const MAX_TRUSTED_HOPS: usize = 10;
const MIN_ADMIN_TOKEN_LEN: usize = 16;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the frontend origin used as the redirect base
    pub fn validate_frontend_url(url: &str) -> Result<(), LimiterError> {
        if url.trim().is_empty() {
            return Err(LimiterError::Configuration(
                "Frontend URL cannot be empty".to_string(),
            ));
        }

        let parsed = Url::parse(url).map_err(|e| {
            LimiterError::Configuration(format!("Invalid frontend URL '{}': {}", url, e))
        })?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(LimiterError::Configuration(
                "Frontend URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        if parsed.host_str().is_none() {
            return Err(LimiterError::Configuration(
                "Frontend URL must include a host".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a bind address
    pub fn validate_bind_address(address: &SocketAddr) -> Result<(), LimiterError> {
        if address.port() == 0 {
            return Err(LimiterError::Configuration(
                "Server port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the number of trusted proxy hops
    pub fn validate_trust_proxy_hops(hops: usize) -> Result<(), LimiterError> {
        if hops > MAX_TRUSTED_HOPS {
            return Err(LimiterError::Configuration(format!(
                "Trusted proxy hops must be at most {}, got {}",
                MAX_TRUSTED_HOPS, hops
            )));
        }

        Ok(())
    }

    /// Validates the sweep interval; zero disables sweeping
    pub fn validate_sweep_interval(interval: Duration) -> Result<(), LimiterError> {
        if !interval.is_zero() && interval < Duration::from_secs(1) {
            return Err(LimiterError::Configuration(
                "Sweep interval must be 0 (disabled) or at least 1s".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates log level name
    pub fn validate_log_level(level: &str) -> Result<(), LimiterError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(LimiterError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, valid_levels
            )));
        }

        Ok(())
    }

    /// Admin routes need a bearer token of at least `MIN_ADMIN_TOKEN_LEN`
    pub fn validate_admin_access(
        enable_admin: bool,
        admin_token: Option<&str>,
    ) -> Result<(), LimiterError> {
        if !enable_admin {
            return Ok(());
        }

        match admin_token.map(str::trim) {
            None | Some("") => Err(LimiterError::Configuration(
                "ADMIN_TOKEN must be set when admin routes are enabled".to_string(),
            )),
            Some(token) if token.len() < MIN_ADMIN_TOKEN_LEN => {
                Err(LimiterError::Configuration(format!(
                    "ADMIN_TOKEN must be at least {} characters",
                    MIN_ADMIN_TOKEN_LEN
                )))
            }
            Some(_) => Ok(()),
        }
    }

    /// Validates the full service configuration
    pub fn validate(config: &Config) -> Result<(), LimiterError> {
        Self::validate_bind_address(&config.bind_addr)?;
        Self::validate_frontend_url(&config.frontend_url)?;
        Self::validate_trust_proxy_hops(config.trust_proxy_hops)?;
        Self::validate_sweep_interval(config.sweep_interval)?;
        Self::validate_log_level(&config.log_level)?;
        Self::validate_admin_access(config.enable_admin, config.admin_token.as_deref())?;

        Ok(())
    }
}
