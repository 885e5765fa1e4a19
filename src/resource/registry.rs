//! Resource Registry - Load resource descriptors from JSON
//!
//! Every resource kind is described once, statically, in the JSON files
//! under `src/resources/`. The built-in catalog is parsed on first access;
//! callers can parse and merge their own catalogs on top of it.

use super::capability::Capability;
use super::case::camel_to_snake;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/ec2.json"),
    include_str!("../resources/autoscaling.json"),
    include_str!("../resources/ecs.json"),
    include_str!("../resources/elb.json"),
    include_str!("../resources/rds.json"),
    include_str!("../resources/cloudwatch.json"),
];

/// Default batch size for chunked describe calls
pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// How a declared call parameter accumulates values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    Scalar,
    List,
}

/// Mapping of one local parameter onto its wire name
#[derive(Debug, Clone, Deserialize)]
pub struct ParamDef {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub default: Option<Value>,
}

/// A list or describe call definition
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallDef {
    /// Call name, derived from the key prefix when absent
    #[serde(default)]
    pub call: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamDef>,
    /// Dotted path of the result collection in the response
    #[serde(default)]
    pub response_key: Option<String>,
    /// Nested collection to flatten out of every element of the result
    #[serde(default)]
    pub item_key: Option<String>,
    /// Wire parameter that receives chunked ids on describe
    #[serde(default)]
    pub id_param: Option<String>,
}

impl CallDef {
    /// Names of every local parameter this call declares
    pub fn declares(&self, local: &str) -> bool {
        self.params.contains_key(local)
    }
}

/// Continuation token names
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_token")]
    pub input_token: String,
    #[serde(default = "default_token")]
    pub output_token: String,
}

fn default_token() -> String {
    "NextToken".to_string()
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            input_token: default_token(),
            output_token: default_token(),
        }
    }
}

/// Casing applied to undeclared pass-through parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamCase {
    #[default]
    CamelCap,
    CamelBack,
}

fn default_true() -> bool {
    true
}

/// Resolves an identity key the describe call cannot take directly
///
/// `call` is invoked with the value under `param`; `source` of the first
/// item under `response_key` becomes the `target` identity field.
#[derive(Debug, Clone, Deserialize)]
pub struct Lookup {
    pub call: String,
    pub param: ParamDef,
    pub response_key: String,
    pub source: String,
    pub target: String,
}

/// Static per-kind metadata
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDescriptor {
    /// Kind name, taken from the catalog key
    #[serde(skip)]
    pub name: String,
    pub service: String,
    pub key_prefix: String,
    /// Prefix stripped from wire keys (defaults to `key_prefix`)
    #[serde(default)]
    pub client_id: Option<String>,
    pub identity_fields: Vec<String>,
    #[serde(default)]
    pub describe: CallDef,
    /// Present for kinds that enumerate ids before describing them
    #[serde(default)]
    pub list: Option<CallDef>,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub param_case: ParamCase,
    #[serde(default)]
    pub max_chunk_size: Option<usize>,
    #[serde(default = "default_true")]
    pub supports_get: bool,
    /// Canonical field -> related kind, resolved before any prefix heuristic
    #[serde(default)]
    pub response_aliases: BTreeMap<String, String>,
    /// Wire key -> canonical key, applied before normalization
    #[serde(default)]
    pub response_overrides: BTreeMap<String, String>,
    /// Relation fields created empty on every instance
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
    /// Source field -> derived field holding its last `/` segment
    #[serde(default)]
    pub short_names: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Extra identity keys accepted by `get`, keyed by local name
    #[serde(default)]
    pub lookups: BTreeMap<String, Lookup>,
}

impl ResourceDescriptor {
    fn snake_prefix(&self) -> String {
        camel_to_snake(&self.key_prefix)
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.key_prefix)
    }

    pub fn describe_call(&self) -> String {
        self.describe
            .call
            .clone()
            .unwrap_or_else(|| format!("describe_{}s", self.snake_prefix()))
    }

    pub fn describe_response_key(&self) -> String {
        self.describe
            .response_key
            .clone()
            .unwrap_or_else(|| format!("{}s", self.key_prefix))
    }

    pub fn list_call(&self) -> Option<String> {
        let list = self.list.as_ref()?;
        Some(
            list.call
                .clone()
                .unwrap_or_else(|| format!("list_{}s", self.snake_prefix())),
        )
    }

    pub fn list_response_key(&self) -> Option<String> {
        let list = self.list.as_ref()?;
        Some(
            list.response_key
                .clone()
                .unwrap_or_else(|| format!("{}Arns", self.key_prefix)),
        )
    }

    /// Wire parameter receiving ids during chunked describe
    pub fn id_param(&self) -> String {
        if let Some(param) = &self.describe.id_param {
            return param.clone();
        }
        match self.describe.params.get("id") {
            Some(def) => def.name.clone(),
            None => self.describe_response_key(),
        }
    }

    /// Chunk size clamped to this kind's provider bound
    pub fn chunk_size(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        match self.max_chunk_size {
            Some(max) => requested.min(max.max(1)),
            None => requested,
        }
    }

    /// Every relation field declared statically or by a capability
    pub fn declared_relations(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .relations
            .iter()
            .map(|(f, k)| (f.clone(), k.clone()))
            .collect();

        for capability in &self.capabilities {
            for (field, kind) in capability.relations() {
                if !fields.iter().any(|(f, _)| f == field) {
                    fields.push((field.to_string(), kind.to_string()));
                }
            }
        }

        fields
    }

    /// The capability that populates `field`, if any
    pub fn capability_for(&self, field: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.populates() == field)
    }

    fn referenced_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self
            .response_aliases
            .values()
            .chain(self.relations.values())
            .map(|s| s.as_str())
            .collect();
        for capability in &self.capabilities {
            kinds.extend(capability.relations().into_iter().map(|(_, k)| k));
        }
        kinds
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    kinds: BTreeMap<String, ResourceDescriptor>,
}

/// A set of resource descriptors keyed by kind name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kinds: BTreeMap<String, Arc<ResourceDescriptor>>,
}

impl Catalog {
    /// Parse a single catalog document and validate its references
    pub fn from_json(content: &str) -> Result<Self> {
        let catalog = Self::parse(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn parse(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("invalid resource catalog: {}", e)))?;

        let kinds = file
            .kinds
            .into_iter()
            .map(|(name, mut descriptor)| {
                descriptor.name = name.clone();
                (name, Arc::new(descriptor))
            })
            .collect();

        Ok(Self { kinds })
    }

    /// Add (or replace) every kind of `other`, then re-validate
    pub fn merge(mut self, other: Catalog) -> Result<Self> {
        self.kinds.extend(other.kinds);
        self.validate()?;
        Ok(self)
    }

    /// Merge a JSON document on top of this catalog
    pub fn extend_json(self, content: &str) -> Result<Self> {
        let other = Self::parse(content)?;
        self.merge(other)
    }

    fn validate(&self) -> Result<()> {
        for descriptor in self.kinds.values() {
            if descriptor.identity_fields.is_empty() {
                return Err(Error::config(format!(
                    "{} declares no identity fields",
                    descriptor.name
                )));
            }
            for kind in descriptor.referenced_kinds() {
                if !self.kinds.contains_key(kind) {
                    return Err(Error::config(format!(
                        "{} references unknown kind {}",
                        descriptor.name, kind
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<ResourceDescriptor>> {
        self.kinds.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Kind names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Longest kind name that `key` starts with
    pub fn prefix_match(&self, key: &str) -> Option<&str> {
        self.names()
            .filter(|name| key.starts_with(name))
            .max_by_key(|name| name.len())
    }
}

/// Global built-in catalog loaded from JSON
static BUILTIN: OnceLock<Catalog> = OnceLock::new();

/// Get the built-in catalog (loads from embedded JSON on first access)
pub fn builtin_catalog() -> &'static Catalog {
    BUILTIN.get_or_init(|| {
        let mut catalog = Catalog::default();

        for content in RESOURCE_FILES {
            let partial = Catalog::parse(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            catalog.kinds.extend(partial.kinds);
        }

        catalog
    })
}
