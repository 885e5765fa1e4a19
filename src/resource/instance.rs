//! Resource instances and their field values

use super::capability::Capability;
use super::fetcher::PaginatedFetcher;
use super::kind::{ResourceKind, Session};
use super::normalize::{snake_record, Normalizer};
use super::relation::RelationHandle;
use crate::error::Result;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Separator between relation names in fetch and filter paths
pub const PATH_SEPARATOR: &str = "__";

/// A canonical field value
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<FieldValue>),
    Record(BTreeMap<String, FieldValue>),
    Relation(RelationHandle),
}

impl FieldValue {
    /// Structural conversion with canonical (snake case) record keys
    pub fn plain(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::String(s),
            Value::Array(items) => FieldValue::List(items.into_iter().map(Self::plain).collect()),
            Value::Object(map) => FieldValue::Record(snake_record(map)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Record(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationHandle> {
        match self {
            FieldValue::Relation(handle) => Some(handle),
            _ => None,
        }
    }

    /// Scalar rendered as text (strings unquoted)
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Short type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Number(_) => "number",
            FieldValue::String(_) => "string",
            FieldValue::List(_) => "list",
            FieldValue::Record(_) => "record",
            FieldValue::Relation(_) => "relation",
        }
    }

    /// Value usable as a call parameter; relations and nulls are not
    pub fn to_param(&self) -> Option<Value> {
        match self {
            FieldValue::Null | FieldValue::Relation(_) => None,
            other => Some(other.to_json()),
        }
    }

    /// JSON rendering; relations render as their contents
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Record(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            FieldValue::Relation(handle) => handle.to_json(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Number(n) => n.serialize(serializer),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::List(items) => serializer.collect_seq(items),
            FieldValue::Record(map) => serializer.collect_map(map),
            FieldValue::Relation(handle) => handle.serialize(serializer),
        }
    }
}

/// One resource of a given kind
///
/// Created either bare (identity fields only, `loaded == false`) or from a
/// full list/describe record. Fields are only written by the normalizer,
/// during construction and `load`.
#[derive(Clone)]
pub struct Resource {
    kind: Arc<ResourceKind>,
    fields: BTreeMap<String, FieldValue>,
    loaded: bool,
    record: Value,
}

impl Resource {
    /// Empty instance with every declared relation field present
    pub(crate) fn empty(kind: Arc<ResourceKind>) -> Self {
        let fields = kind
            .descriptor()
            .declared_relations()
            .into_iter()
            .map(|(field, related)| (field, FieldValue::Relation(RelationHandle::new(&related))))
            .collect();

        Self {
            kind,
            fields,
            loaded: false,
            record: Value::Null,
        }
    }

    pub fn kind(&self) -> &Arc<ResourceKind> {
        &self.kind
    }

    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The raw describe record this instance was loaded from
    pub fn as_record(&self) -> &Value {
        &self.record
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationHandle> {
        self.field(name).and_then(FieldValue::as_relation)
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut RelationHandle> {
        match self.fields.get_mut(name) {
            Some(FieldValue::Relation(handle)) => Some(handle),
            _ => None,
        }
    }

    /// `name=value` pairs for whichever identity fields are set
    pub fn identity(&self) -> String {
        let parts: Vec<String> = self
            .kind
            .descriptor()
            .identity_fields
            .iter()
            .filter_map(|f| {
                self.field(f)
                    .and_then(FieldValue::scalar_text)
                    .map(|v| format!("{}={}", f, v))
            })
            .collect();

        if parts.is_empty() {
            "no identity".to_string()
        } else {
            parts.join(", ")
        }
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub(crate) fn mark_loaded(&mut self, record: Value) {
        self.loaded = true;
        self.record = record;
    }

    /// The relation handle for `field`, created (or re-created for a
    /// different kind) on demand so repeated access returns one handle
    pub(crate) fn relation_entry(&mut self, field: &str, kind: &str) -> &mut RelationHandle {
        let reuse = matches!(self.fields.get(field), Some(FieldValue::Relation(h)) if h.kind() == kind);
        if !reuse {
            self.fields.insert(
                field.to_string(),
                FieldValue::Relation(RelationHandle::new(kind)),
            );
        }

        match self.fields.get_mut(field) {
            Some(FieldValue::Relation(handle)) => handle,
            _ => unreachable!("relation slot was just ensured"),
        }
    }

    /// JSON rendering of every field
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<Map<String, Value>>(),
        )
    }

    /// Describe this instance and apply the response
    ///
    /// A loaded instance is left untouched unless `force` is set.
    pub async fn load(&mut self, session: &Session, force: bool) -> Result<()> {
        if self.loaded && !force {
            return Ok(());
        }

        let kind = self.kind.clone();
        let record = PaginatedFetcher::new(session, &kind).describe_one(self).await?;
        Normalizer::new(session).apply_loaded(self, record)
    }

    /// Load this instance if needed, then materialize each relation path
    ///
    /// Paths are relation names joined by `__` (or `.`), e.g.
    /// `launch_configuration__security_groups`.
    pub async fn fetch<S: AsRef<str>>(
        &mut self,
        session: &Session,
        paths: &[S],
        force: bool,
    ) -> Result<()> {
        if force || !self.loaded {
            self.load(session, force).await?;
        }

        let paths: Vec<String> = paths.iter().map(|p| p.as_ref().to_string()).collect();
        self.fetch_relations(session, &paths, force).await
    }

    /// Materialize relation paths without reloading this instance
    pub(crate) fn fetch_relations<'a>(
        &'a mut self,
        session: &'a Session,
        paths: &'a [String],
        force: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let groups = group_paths(paths);
            if groups.is_empty() {
                return Ok(());
            }

            // Capability hooks run first; they may read other relations.
            let descriptor = self.kind.descriptor().clone();
            let mut hooked: Vec<&Capability> = Vec::new();
            for head in groups.keys() {
                if let Some(capability) = descriptor.capability_for(head) {
                    if !hooked.iter().any(|c| std::ptr::eq(*c, capability)) {
                        hooked.push(capability);
                    }
                }
            }
            for capability in hooked {
                capability.populate(session, self, force).await?;
            }

            for head in groups.keys() {
                if !self.fields.contains_key(head) {
                    tracing::debug!("{} has no relation {}", self.kind.name(), head);
                }
            }

            let pending = self.fields.iter_mut().filter_map(|(name, value)| {
                let rest = groups.get(name)?;
                match value {
                    FieldValue::Relation(handle) => {
                        if rest.is_empty() && descriptor.capability_for(name).is_some() {
                            return None;
                        }
                        Some(handle.fetch(session, rest, force))
                    }
                    _ => None,
                }
            });
            try_join_all(pending).await?;

            Ok(())
        }
        .boxed()
    }
}

/// Group paths by their first relation name, keeping the non-empty tails
fn group_paths(paths: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for path in paths {
        let segments: Vec<&str> = path
            .split(PATH_SEPARATOR)
            .flat_map(|s| s.split('.'))
            .filter(|s| !s.is_empty())
            .collect();

        let Some((head, rest)) = segments.split_first() else {
            continue;
        };

        let tails = groups.entry(head.to_string()).or_default();
        if !rest.is_empty() {
            let tail = rest.join(PATH_SEPARATOR);
            if !tails.contains(&tail) {
                tails.push(tail);
            }
        }
    }

    groups
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &self.kind.name())
            .field("loaded", &self.loaded)
            .field("fields", &self.fields)
            .finish()
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
