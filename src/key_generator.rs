//! Key derivation for rate limit counters.

use std::fmt;

/// Resolved identity of the calling client, attached to each request as an
/// extension before any limiter runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strategy for turning a client identity into a counter key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The identity itself
    #[default]
    ClientIdentity,
    /// `<namespace>_<identity>`; policies using the same namespace and store
    /// share one budget
    Namespaced(String),
}

impl KeyStrategy {
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        KeyStrategy::Namespaced(namespace.into())
    }

    /// Derive the counter key for `identity`
    pub fn generate_key(&self, identity: &ClientIdentity) -> String {
        match self {
            KeyStrategy::ClientIdentity => identity.as_str().to_string(),
            KeyStrategy::Namespaced(namespace) => format!("{}_{}", namespace, identity),
        }
    }
}
