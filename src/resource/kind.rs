//! Sessions, resource kinds and the per-kind query surface

use super::fetcher::{extract_items, PaginatedFetcher};
use super::instance::{Resource, PATH_SEPARATOR};
use super::normalize::Normalizer;
use super::registry::{builtin_catalog, Catalog, Lookup, ParamKind, ResourceDescriptor, DEFAULT_CHUNK_SIZE};
use crate::client::{ClientRegistry, Params, Transport};
use crate::error::{Error, Result};
use crate::query::Filter;
use dashmap::DashMap;
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;

/// Keyword routed to related paths by [`Resources::filter`]
pub const WITH_RELATED: &str = "with_related";

/// A resource kind bound to one client
pub struct ResourceKind {
    descriptor: Arc<ResourceDescriptor>,
    client: Arc<dyn Transport>,
}

impl ResourceKind {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.descriptor
    }

    pub fn client(&self) -> &Arc<dyn Transport> {
        &self.client
    }
}

impl std::fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceKind")
            .field("name", &self.descriptor.name)
            .field("service", &self.descriptor.service)
            .finish()
    }
}

/// One credentials context: a client registry plus the kinds bound to it
///
/// Clones share the registry and the kind cache.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    registry: ClientRegistry,
    catalog: Arc<Catalog>,
    chunk_size: usize,
    kinds: DashMap<String, Arc<ResourceKind>>,
}

impl Session {
    /// Session over the built-in catalog
    pub fn new(registry: ClientRegistry) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: ClientRegistry) -> SessionBuilder {
        SessionBuilder {
            registry,
            catalog: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.inner.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Default batch size for chunked describes
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// The kind named `name`, bound to this session's client for its service
    ///
    /// Repeated calls return the same binding.
    pub fn kind(&self, name: &str) -> Result<Arc<ResourceKind>> {
        if let Some(kind) = self.inner.kinds.get(name) {
            return Ok(kind.clone());
        }

        let descriptor = self
            .inner
            .catalog
            .get(name)
            .ok_or_else(|| Error::UnknownKind(name.to_string()))?
            .clone();
        let client = self.inner.registry.get(&descriptor.service)?;

        let kind = Arc::new(ResourceKind { descriptor, client });
        let entry = self.inner.kinds.entry(name.to_string()).or_insert(kind);
        Ok(entry.value().clone())
    }

    /// Query surface for one kind
    pub fn resources(&self, name: &str) -> Result<Resources<'_>> {
        Ok(Resources {
            session: self,
            kind: self.kind(name)?,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.inner.registry)
            .field("kinds", &self.inner.catalog.len())
            .field("chunk_size", &self.inner.chunk_size)
            .finish()
    }
}

pub struct SessionBuilder {
    registry: ClientRegistry,
    catalog: Option<Catalog>,
    chunk_size: usize,
}

impl SessionBuilder {
    /// Use `catalog` instead of the built-in one
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn build(self) -> Session {
        let catalog = self
            .catalog
            .unwrap_or_else(|| builtin_catalog().clone());

        Session {
            inner: Arc::new(SessionInner {
                registry: self.registry,
                catalog: Arc::new(catalog),
                chunk_size: self.chunk_size,
                kinds: DashMap::new(),
            }),
        }
    }
}

/// Options for [`Resources::list`]
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Caller parameters, local names for declared ones
    pub params: Params,
    /// Instances whose identity fields seed the describe parameters
    pub seeds: Vec<Resource>,
    /// Relation paths to materialize on every result
    pub with_related: Vec<String>,
    /// Overrides the session's chunk size
    pub chunk_size: Option<usize>,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn seeds(mut self, seeds: Vec<Resource>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_related(mut self, path: impl Into<String>) -> Self {
        self.with_related.push(path.into());
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

/// Query surface for one kind within a session
pub struct Resources<'s> {
    session: &'s Session,
    kind: Arc<ResourceKind>,
}

impl<'s> Resources<'s> {
    pub fn kind(&self) -> &Arc<ResourceKind> {
        &self.kind
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        self.kind.descriptor()
    }

    /// Unloaded instance holding only the given fields
    pub fn bare(&self, identity: Params) -> Result<Resource> {
        Normalizer::new(self.session).build(&self.kind, identity, false)
    }

    /// Loaded instance from a full describe record
    pub fn from_record(&self, record: Value) -> Result<Resource> {
        match record {
            Value::Object(map) => Normalizer::new(self.session).build(&self.kind, map, true),
            other => Err(Error::config(format!(
                "{} record must be an object, got {}",
                self.kind.name(),
                other
            ))),
        }
    }

    /// Fetch exactly one instance by identity
    pub async fn get(&self, identity: Params) -> Result<Resource> {
        self.get_with_related(identity, &[] as &[&str]).await
    }

    /// Fetch one instance, then materialize `with_related` paths on it
    pub async fn get_with_related<S: AsRef<str>>(
        &self,
        identity: Params,
        with_related: &[S],
    ) -> Result<Resource> {
        let descriptor = self.kind.descriptor();
        if !descriptor.supports_get {
            return Err(Error::Unsupported {
                kind: self.kind.name().to_string(),
                operation: "get",
            });
        }
        if identity.is_empty() {
            return Err(Error::config(format!(
                "get {} needs one of {}",
                self.kind.name(),
                descriptor.identity_fields.join(", ")
            )));
        }

        let identity = self.resolve_lookups(identity).await?;
        let mut resource = self.bare(identity)?;
        resource.load(self.session, false).await?;

        let paths: Vec<String> = with_related.iter().map(|p| p.as_ref().to_string()).collect();
        resource.fetch_relations(self.session, &paths, false).await?;

        Ok(resource)
    }

    /// Swap lookup keys (an ASG's `instance_id`) for the identity they resolve to
    async fn resolve_lookups(&self, mut identity: Params) -> Result<Params> {
        let descriptor = self.kind.descriptor().clone();

        for (key, lookup) in &descriptor.lookups {
            let Some(value) = identity.remove(key) else {
                continue;
            };
            let Some(resolved) = self.lookup(lookup, &value).await? else {
                let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                return Err(Error::NotFound {
                    kind: self.kind.name().to_string(),
                    identity: format!("{}={}", key, shown),
                });
            };
            tracing::debug!("{} {} resolved via {}", self.kind.name(), key, lookup.call);
            identity.insert(lookup.target.clone(), resolved);
        }

        Ok(identity)
    }

    async fn lookup(&self, lookup: &Lookup, value: &Value) -> Result<Option<Value>> {
        let wire = match lookup.param.kind {
            ParamKind::List => Value::Array(vec![value.clone()]),
            ParamKind::Scalar => value.clone(),
        };
        let mut params = Params::new();
        params.insert(lookup.param.name.clone(), wire);

        let response = self.kind.client().invoke(&lookup.call, &params).await?;
        Ok(extract_items(&response, &lookup.response_key)
            .into_iter()
            .find_map(|item| item.get(&lookup.source).filter(|v| !v.is_null()).cloned()))
    }

    /// Every instance matching `request`, fully loaded
    pub async fn list(&self, request: ListRequest) -> Result<Vec<Resource>> {
        let mut resources = PaginatedFetcher::new(self.session, &self.kind)
            .list(&request)
            .await?;

        if !request.with_related.is_empty() {
            let session = self.session;
            let paths = &request.with_related;
            try_join_all(
                resources
                    .iter_mut()
                    .map(|resource| resource.fetch_relations(session, paths, false)),
            )
            .await?;
        }

        Ok(resources)
    }

    /// List with keyword arguments, keeping instances that match every
    /// predicate
    ///
    /// Keys with a `__` path (`name__icontains`) become predicates,
    /// `with_related` names relation paths, anything else is passed to the
    /// listing call.
    pub async fn filter<I, K>(&self, kwargs: I) -> Result<Vec<Resource>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut filter = Filter::new();
        let mut request = ListRequest::new();

        for (key, value) in kwargs {
            let key = key.into();
            if key == WITH_RELATED {
                request.with_related.extend(related_paths(&value)?);
            } else if key.contains(PATH_SEPARATOR) {
                filter = filter.with(&key, value)?;
            } else {
                request = request.param(key, value);
            }
        }

        let resources = self.list(request).await?;
        filter.run(self.session, resources).await
    }
}

fn related_paths(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(path) => Ok(vec![path.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::config(format!("{} entries must be strings", WITH_RELATED)))
            })
            .collect(),
        other => Err(Error::config(format!(
            "{} must be a path or a list of paths, got {}",
            WITH_RELATED, other
        ))),
    }
}
