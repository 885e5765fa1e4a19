//! Transport capability consumed by the engine

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parameter record handed to a transport call.
pub type Params = Map<String, Value>;

/// Default number of concurrent connections per client.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Connection pool sizing shared by every client a registry builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// One client bound to one logical service.
///
/// Retry, backoff and credential handling are the implementation's
/// business; the engine only sees the response record or the error.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke `call` with `params` and return the raw response record.
    async fn invoke(&self, call: &str, params: &Params) -> anyhow::Result<Value>;
}

/// Builds transports for a registry, one per service name.
pub trait TransportFactory: Send + Sync {
    fn build(&self, service: &str, pool: &PoolConfig) -> anyhow::Result<Arc<dyn Transport>>;
}
