//! Filter and Exclude over lists of resources
//!
//! Each predicate walks its path through fields, nested records, lists and
//! relations. Unloaded relations met on the way are fetched once. Lists
//! and list relations match when any element matches, and are narrowed to
//! the matching elements, so the surviving parents carry only the related
//! instances that satisfied the predicate.

use super::predicate::Predicate;
use crate::error::{Error, Result};
use crate::resource::{Contents, FieldValue, RelationHandle, Resource, Session};
use futures::future::{join_all, try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;

/// Keeps resources matching every predicate
#[derive(Debug, Clone, Default)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(path__operation, operand)` pairs
    pub fn parse<I, K>(conditions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        conditions
            .into_iter()
            .try_fold(Self::new(), |filter, (key, operand)| filter.with(key.as_ref(), operand))
    }

    /// Add a condition, replacing any earlier one with the same key
    pub fn with(mut self, key: &str, operand: impl Into<Value>) -> Result<Self> {
        let predicate = Predicate::parse(key, operand.into())?;
        match self.predicates.iter_mut().find(|p| p.key() == key) {
            Some(existing) => *existing = predicate,
            None => self.predicates.push(predicate),
        }
        Ok(self)
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Resources matching every predicate, in input order
    pub async fn run(&self, session: &Session, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        apply(&self.predicates, session, resources, true).await
    }
}

/// Drops resources matching the predicates
#[derive(Debug, Clone, Default)]
pub struct Exclude {
    filter: Filter,
}

impl Exclude {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, K>(conditions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        Ok(Self {
            filter: Filter::parse(conditions)?,
        })
    }

    pub fn with(self, key: &str, operand: impl Into<Value>) -> Result<Self> {
        Ok(Self {
            filter: self.filter.with(key, operand)?,
        })
    }

    pub fn predicates(&self) -> &[Predicate] {
        self.filter.predicates()
    }

    /// Resources not matching, predicate by predicate, in input order
    pub async fn run(&self, session: &Session, resources: Vec<Resource>) -> Result<Vec<Resource>> {
        apply(&self.filter.predicates, session, resources, false).await
    }
}

/// Apply predicates in sequence, keeping the resources whose match result
/// equals `keep`
async fn apply(
    predicates: &[Predicate],
    session: &Session,
    mut resources: Vec<Resource>,
    keep: bool,
) -> Result<Vec<Resource>> {
    for predicate in predicates {
        let walk = Walk { session, predicate };
        let hits = join_all(
            resources
                .iter_mut()
                .map(|resource| walk.resource(resource, predicate.path())),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<bool>>>()?;

        tracing::debug!(
            "{}: {} of {} matched",
            predicate.key(),
            hits.iter().filter(|hit| **hit).count(),
            hits.len()
        );

        resources = resources
            .into_iter()
            .zip(hits)
            .filter(|(_, hit)| *hit == keep)
            .map(|(resource, _)| resource)
            .collect();
    }

    Ok(resources)
}

/// One predicate's traversal
struct Walk<'a> {
    session: &'a Session,
    predicate: &'a Predicate,
}

impl<'a> Walk<'a> {
    fn resource<'b>(&'b self, resource: &'b mut Resource, path: &'b [String]) -> BoxFuture<'b, Result<bool>> {
        async move {
            let Some((head, rest)) = path.split_first() else {
                tracing::warn!(
                    "{}: {} resolves to a resource, not a value",
                    self.predicate.key(),
                    resource.kind_name()
                );
                return Ok(false);
            };

            if !resource.is_loaded() {
                if let Err(e) = resource.load(self.session, false).await {
                    return self.skip(e);
                }
            }

            let unloaded = resource.relation(head).is_some_and(|h| !h.is_loaded());
            if unloaded {
                let heads = std::slice::from_ref(head);
                if let Err(e) = resource.fetch_relations(self.session, heads, false).await {
                    return self.skip(e);
                }
            }

            let kind = resource.kind_name().to_string();
            match resource.field_mut(head) {
                Some(value) => self.value(value, rest).await,
                None => {
                    tracing::warn!("{}: {} has no field {}", self.predicate.key(), kind, head);
                    Ok(false)
                }
            }
        }
        .boxed()
    }

    fn value<'b>(&'b self, node: &'b mut FieldValue, path: &'b [String]) -> BoxFuture<'b, Result<bool>> {
        async move {
            if path.is_empty() {
                return Ok(self.leaf(node));
            }

            match node {
                FieldValue::List(items) => {
                    let hits =
                        try_join_all(items.iter_mut().map(|item| self.value(item, path))).await?;
                    Ok(narrow(items, hits))
                }
                FieldValue::Record(map) => {
                    let Some((head, rest)) = path.split_first() else {
                        return Ok(false);
                    };
                    match map.get_mut(head) {
                        Some(value) => self.value(value, rest).await,
                        None => Ok(false),
                    }
                }
                FieldValue::Relation(handle) => self.relation(handle, path).await,
                FieldValue::Null => Ok(false),
                other => {
                    tracing::debug!(
                        "{}: cannot descend into a {} value",
                        self.predicate.key(),
                        other.type_name()
                    );
                    Ok(false)
                }
            }
        }
        .boxed()
    }

    async fn relation(&self, handle: &mut RelationHandle, path: &[String]) -> Result<bool> {
        if let Err(e) = handle.load(self.session, false).await {
            return self.skip(e);
        }

        match handle.contents_mut() {
            Contents::Empty => Ok(false),
            Contents::One(resource) => self.resource(resource, path).await,
            Contents::Many(items) => {
                let hits =
                    try_join_all(items.iter_mut().map(|item| self.resource(item, path))).await?;
                Ok(narrow(items, hits))
            }
        }
    }

    fn leaf(&self, node: &FieldValue) -> bool {
        match self.predicate.evaluate(node) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("{}: {}", self.predicate.key(), e);
                false
            }
        }
    }

    /// Lookup failures of related instances count as non-matches
    fn skip(&self, error: Error) -> Result<bool> {
        if error.is_lookup_failure() {
            tracing::warn!("{}: {}", self.predicate.key(), error);
            Ok(false)
        } else {
            Err(error)
        }
    }
}

/// Keep only the matching elements; true if any matched
fn narrow<T>(items: &mut Vec<T>, hits: Vec<bool>) -> bool {
    if !hits.iter().any(|hit| *hit) {
        return false;
    }

    let mut hits = hits.into_iter();
    items.retain(|_| hits.next().unwrap_or(false));
    true
}
