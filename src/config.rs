use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::rate_limit_config::PolicyOverrides;

/// Service configuration, read from flags or the matching environment
/// variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "auth-throttle", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Frontend origin; OAuth rejections redirect to `<FRONTEND_URL>/login`
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:5173")]
    pub frontend_url: String,

    /// Reverse proxies trusted to append to X-Forwarded-For
    #[arg(long, env = "TRUST_PROXY_HOPS", default_value_t = 1)]
    pub trust_proxy_hops: usize,

    /// How often expired counters are swept, e.g. `60s`; `0s` disables
    #[arg(long, env = "SWEEP_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub sweep_interval: Duration,

    /// JSON file with per-policy overrides
    #[arg(long, env = "POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    /// Expose /admin/stats and the manual key reset endpoint
    #[arg(long, env = "ENABLE_ADMIN")]
    pub enable_admin: bool,

    /// Bearer token required on every /admin route
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from the command line and environment
    pub fn from_env() -> Self {
        Config::parse()
    }

    /// Policy overrides from `policy_file`, or none
    pub fn policy_overrides(&self) -> Result<PolicyOverrides> {
        match &self.policy_file {
            Some(path) => PolicyOverrides::from_file(path),
            None => Ok(PolicyOverrides::default()),
        }
    }
}
