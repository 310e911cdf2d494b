pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod registry;
pub mod response;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{LimiterError, Result};
pub use key_generator::{ClientIdentity, KeyStrategy};
pub use rate_limit_config::{HeaderMode, PolicyConfig};
pub use rate_limiter::{Decision, LimiterGuard};
pub use registry::{Policy, PolicyRegistry};
pub use response::RejectStrategy;
pub use server::create_app;
pub use store::{CounterStore, MemoryStore};
