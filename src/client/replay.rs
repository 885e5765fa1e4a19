//! Replay transport
//!
//! Serves scripted responses instead of calling a provider. Scripts are
//! usually loaded from YAML fixtures:
//!
//! ```yaml
//! autoscaling:
//!   - call: describe_auto_scaling_groups
//!     response:
//!       AutoScalingGroups: []
//!   - call: describe_auto_scaling_groups
//!     when: { NextToken: page-2 }
//!     response:
//!       AutoScalingGroups: []
//! ```
//!
//! Every invocation is recorded in a shared [`ReplayLog`].

use super::transport::{Params, PoolConfig, Transport, TransportFactory};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// One scripted response
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedCall {
    pub call: String,
    /// Params that must be present (and equal) for this entry to apply
    #[serde(default)]
    pub when: Params,
    pub response: Value,
}

impl ScriptedCall {
    fn matches(&self, call: &str, params: &Params) -> bool {
        self.call == call && self.when.iter().all(|(k, v)| params.get(k) == Some(v))
    }
}

/// A call observed by the replay transport
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: String,
    pub call: String,
    pub params: Params,
}

/// Shared record of every replayed invocation
#[derive(Debug, Clone, Default)]
pub struct ReplayLog {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ReplayLog {
    fn push(&self, call: RecordedCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of invocations of `call` across all services
    pub fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.call == call)
            .count()
    }

    pub fn total(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type Handler = Arc<dyn Fn(&Params) -> Result<Value> + Send + Sync>;

/// Builds replay transports from a script
#[derive(Clone, Default)]
pub struct ReplayFactory {
    script: HashMap<String, Vec<ScriptedCall>>,
    handlers: HashMap<(String, String), Handler>,
    log: ReplayLog,
}

impl ReplayFactory {
    /// Parse a `service -> [scripted call]` YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let script: HashMap<String, Vec<ScriptedCall>> =
            serde_yaml::from_str(content).context("Failed to parse replay script")?;
        Ok(Self {
            script,
            ..Self::default()
        })
    }

    /// Load a YAML (or JSON) fixture file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Add a response that applies to every invocation of `call`
    pub fn with_response(self, service: &str, call: &str, response: Value) -> Self {
        self.with_scripted(
            service,
            ScriptedCall {
                call: call.to_string(),
                when: Params::new(),
                response,
            },
        )
    }

    pub fn with_scripted(mut self, service: &str, scripted: ScriptedCall) -> Self {
        self.script
            .entry(service.to_string())
            .or_default()
            .push(scripted);
        self
    }

    /// Compute responses for `call` from the request params
    pub fn with_handler<F>(mut self, service: &str, call: &str, handler: F) -> Self
    where
        F: Fn(&Params) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers
            .insert((service.to_string(), call.to_string()), Arc::new(handler));
        self
    }

    /// Handle on the shared invocation log
    pub fn log(&self) -> ReplayLog {
        self.log.clone()
    }
}

impl TransportFactory for ReplayFactory {
    fn build(&self, service: &str, _pool: &PoolConfig) -> Result<Arc<dyn Transport>> {
        let handlers = self
            .handlers
            .iter()
            .filter(|((svc, _), _)| svc == service)
            .map(|((_, call), handler)| (call.clone(), handler.clone()))
            .collect();

        Ok(Arc::new(ReplayTransport {
            service: service.to_string(),
            script: self.script.get(service).cloned().unwrap_or_default(),
            handlers,
            log: self.log.clone(),
        }))
    }
}

/// Transport serving one service's script
pub struct ReplayTransport {
    service: String,
    script: Vec<ScriptedCall>,
    handlers: HashMap<String, Handler>,
    log: ReplayLog,
}

impl ReplayTransport {
    /// The matching entry with the most `when` constraints wins
    fn lookup(&self, call: &str, params: &Params) -> Option<&ScriptedCall> {
        self.script
            .iter()
            .filter(|s| s.matches(call, params))
            .max_by_key(|s| s.when.len())
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn invoke(&self, call: &str, params: &Params) -> Result<Value> {
        tracing::debug!("replay {}.{}", self.service, call);

        self.log.push(RecordedCall {
            service: self.service.clone(),
            call: call.to_string(),
            params: params.clone(),
        });

        if let Some(handler) = self.handlers.get(call) {
            return handler(params);
        }

        self.lookup(call, params)
            .map(|s| s.response.clone())
            .ok_or_else(|| anyhow::anyhow!("No scripted response for {}.{}", self.service, call))
    }
}
