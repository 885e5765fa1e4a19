//! Client Registry
//!
//! Lazily creates and caches one transport per logical service name for a
//! single credentials/session context.

use super::transport::{Params, PoolConfig, Transport, TransportFactory};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Service used for the caller identity lookup
const IDENTITY_SERVICE: &str = "sts";
const IDENTITY_CALL: &str = "get_caller_identity";

/// Per-session client cache
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    id: u64,
    factory: Arc<dyn TransportFactory>,
    pool: PoolConfig,
    region: String,
    clients: DashMap<String, Arc<dyn Transport>>,
    account: OnceCell<String>,
}

impl ClientRegistry {
    /// Create a new registry bound to `factory` and `region`
    pub fn new(factory: impl TransportFactory + 'static, region: &str, pool: PoolConfig) -> Self {
        Self::from_factory(Arc::new(factory), region, pool)
    }

    pub fn from_factory(factory: Arc<dyn TransportFactory>, region: &str, pool: PoolConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                factory,
                pool,
                region: region.to_string(),
                clients: DashMap::new(),
                account: OnceCell::new(),
            }),
        }
    }

    pub fn region(&self) -> &str {
        &self.inner.region
    }

    pub fn pool(&self) -> PoolConfig {
        self.inner.pool
    }

    /// Get the client for `service`, building it on first use
    pub fn get(&self, service: &str) -> Result<Arc<dyn Transport>> {
        if let Some(client) = self.inner.clients.get(service) {
            return Ok(client.clone());
        }

        tracing::debug!("registry {}: building client for service {}", self.inner.id, service);
        let client = self.inner.factory.build(service, &self.inner.pool)?;

        // A racing builder may have won; keep whichever landed first.
        let entry = self
            .inner
            .clients
            .entry(service.to_string())
            .or_insert(client);
        Ok(entry.value().clone())
    }

    /// Account id of the bound credentials, looked up once
    pub async fn account(&self) -> Result<String> {
        let account = self
            .inner
            .account
            .get_or_try_init(|| async {
                let sts = self.get(IDENTITY_SERVICE)?;
                let response = sts.invoke(IDENTITY_CALL, &Params::new()).await?;
                response
                    .get("Account")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::MalformedResponse {
                        call: IDENTITY_CALL.to_string(),
                        reason: "missing Account".to_string(),
                    })
            })
            .await?;
        Ok(account.clone())
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("id", &self.inner.id)
            .field("region", &self.inner.region)
            .field("clients", &self.inner.clients.len())
            .finish()
    }
}
