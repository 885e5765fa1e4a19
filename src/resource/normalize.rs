//! Response normalization
//!
//! Turns provider records into canonical fields:
//!
//! 1. descriptor overrides rename wire keys (truthy values only)
//! 2. the kind's client id prefix is stripped (`GroupId` -> `Id`)
//! 3. keys become snake case
//! 4. response aliases build related instances
//! 5. otherwise a key starting with a known kind name builds a relation
//! 6. anything else is stored structurally

use super::case::camel_to_snake;
use super::instance::{FieldValue, Resource};
use super::kind::{ResourceKind, Session};
use super::registry::ResourceDescriptor;
use super::relation::Contents;
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Field used for bare instances built from a scalar value
const SCALAR_FIELD: &str = "id";

pub(crate) struct Normalizer<'a> {
    session: &'a Session,
}

impl<'a> Normalizer<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Build an instance of `kind` from a wire record
    pub fn build(
        &self,
        kind: &Arc<ResourceKind>,
        record: Map<String, Value>,
        loaded: bool,
    ) -> Result<Resource> {
        let mut resource = Resource::empty(kind.clone());
        if loaded {
            resource.mark_loaded(Value::Object(record.clone()));
        }
        self.apply(&mut resource, record)?;
        Ok(resource)
    }

    /// Apply a full describe record to an existing instance
    pub fn apply_loaded(&self, resource: &mut Resource, record: Map<String, Value>) -> Result<()> {
        self.apply(resource, record.clone())?;
        resource.mark_loaded(Value::Object(record));
        Ok(())
    }

    fn apply(&self, resource: &mut Resource, mut record: Map<String, Value>) -> Result<()> {
        let descriptor = resource.kind().descriptor().clone();

        for (wire, canonical) in &descriptor.response_overrides {
            if let Some(value) = record.remove(wire) {
                if is_truthy(&value) {
                    record.insert(canonical.clone(), value);
                }
            }
        }

        for (key, value) in record {
            self.set_field(resource, &descriptor, &key, value)?;
        }

        for (source, target) in &descriptor.short_names {
            let short = resource.str_field(source).map(short_name);
            if let Some(short) = short {
                resource.set_field(target, FieldValue::String(short));
            }
        }

        Ok(())
    }

    fn set_field(
        &self,
        resource: &mut Resource,
        descriptor: &ResourceDescriptor,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let field = camel_to_snake(strip_client_id(key, descriptor.client_id()));

        if let Some(alias) = descriptor.response_aliases.get(&field) {
            return self.set_alias(resource, &field, alias, value);
        }

        if !value.is_null() {
            if let Some(kind) = self.session.catalog().prefix_match(&field) {
                let kind = kind.to_string();
                return self.set_prefixed(resource, &field, &kind, value);
            }
        }

        resource.set_field(&field, FieldValue::plain(value));
        Ok(())
    }

    fn set_alias(
        &self,
        resource: &mut Resource,
        field: &str,
        kind: &str,
        value: Value,
    ) -> Result<()> {
        let related = self.session.kind(kind)?;
        let contents = match value {
            Value::Null => Contents::Empty,
            Value::Array(items) => Contents::Many(
                items
                    .into_iter()
                    .map(|item| self.related(&related, item, SCALAR_FIELD))
                    .collect::<Result<_>>()?,
            ),
            other => Contents::One(Box::new(self.related(&related, other, SCALAR_FIELD)?)),
        };

        resource.relation_entry(field, kind).fill(contents)
    }

    fn set_prefixed(
        &self,
        resource: &mut Resource,
        field: &str,
        kind: &str,
        value: Value,
    ) -> Result<()> {
        let related = self.session.kind(kind)?;
        let plural = format!("{}s", kind);

        let (target, contents) = match value {
            Value::Array(items) => {
                let scalar_field = if field == plural {
                    SCALAR_FIELD.to_string()
                } else {
                    list_field_name(field, kind)
                };
                let members = items
                    .into_iter()
                    .map(|item| self.related(&related, item, &scalar_field))
                    .collect::<Result<_>>()?;
                (plural, Contents::Many(members))
            }
            other => {
                let scalar_field = scalar_field_name(field, kind);
                let member = self.related(&related, other, &scalar_field)?;
                (kind.to_string(), Contents::One(Box::new(member)))
            }
        };

        resource.relation_entry(&target, kind).fill(contents)
    }

    /// Unloaded instance from a nested record or a bare scalar
    fn related(&self, kind: &Arc<ResourceKind>, value: Value, scalar_field: &str) -> Result<Resource> {
        let record = match value {
            Value::Object(map) => map,
            scalar => {
                let mut map = Map::new();
                map.insert(scalar_field.to_string(), scalar);
                map
            }
        };
        self.build(kind, record, false)
    }
}

/// Strip the kind's own prefix unless nothing would be left
fn strip_client_id<'k>(key: &'k str, client_id: &str) -> &'k str {
    match key.strip_prefix(client_id) {
        Some(rest) if !rest.is_empty() => rest,
        _ => key,
    }
}

/// Field name for members of a scalar list, e.g. `security_group_ids` -> `id`
fn list_field_name(field: &str, kind: &str) -> String {
    let rest = field.replacen(kind, "", 1);
    let rest = rest.strip_prefix('_').unwrap_or(&rest);
    let rest = rest.strip_suffix('s').unwrap_or(rest);
    if rest.is_empty() {
        SCALAR_FIELD.to_string()
    } else {
        rest.to_string()
    }
}

/// Field name for a single scalar reference, e.g. `image_id` -> `id`
fn scalar_field_name(field: &str, kind: &str) -> String {
    let rest = field
        .replacen(&format!("{}_", kind), "", 1)
        .replacen(kind, "", 1);
    if rest.is_empty() {
        SCALAR_FIELD.to_string()
    } else {
        rest
    }
}

/// Last `/` segment of an ARN-like value
pub(crate) fn short_name(value: &str) -> String {
    value.rsplit('/').next().unwrap_or(value).to_string()
}

/// Record with snake case keys; the first key wins on collision
pub(crate) fn snake_record(map: Map<String, Value>) -> BTreeMap<String, FieldValue> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        out.entry(camel_to_snake(&key))
            .or_insert_with(|| FieldValue::plain(value));
    }
    out
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
