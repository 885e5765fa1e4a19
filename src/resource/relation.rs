//! Relation handles
//!
//! A relation field holds zero, one or many instances of a single related
//! kind. Handles are filled by the normalizer (possibly with bare,
//! unloaded instances) and materialized on demand with [`RelationHandle::load`]
//! and [`RelationHandle::fetch`].

use super::instance::Resource;
use super::kind::{ListRequest, Session};
use crate::error::{Error, Result};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::ser::{Serialize, Serializer};
use serde_json::Value;

/// What a relation currently holds
#[derive(Debug, Clone, Default)]
pub enum Contents {
    #[default]
    Empty,
    One(Box<Resource>),
    Many(Vec<Resource>),
}

#[derive(Debug, Clone)]
pub struct RelationHandle {
    kind: String,
    contents: Contents,
    /// Set once a fill or load has been attempted, so an empty relation
    /// can still count as loaded
    attempted: bool,
}

impl RelationHandle {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            contents: Contents::Empty,
            attempted: false,
        }
    }

    /// Kind of every instance this handle may hold
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn contents(&self) -> &Contents {
        &self.contents
    }

    pub(crate) fn contents_mut(&mut self) -> &mut Contents {
        &mut self.contents
    }

    pub fn is_list(&self) -> bool {
        matches!(self.contents, Contents::Many(_))
    }

    pub fn was_attempted(&self) -> bool {
        self.attempted
    }

    /// True when every held instance is loaded; an empty handle counts as
    /// loaded only after a fill or load was attempted
    pub fn is_loaded(&self) -> bool {
        match &self.contents {
            Contents::Empty => self.attempted,
            Contents::One(resource) => resource.is_loaded(),
            Contents::Many(items) if items.is_empty() => self.attempted,
            Contents::Many(items) => items.iter().all(Resource::is_loaded),
        }
    }

    pub fn len(&self) -> usize {
        match &self.contents {
            Contents::Empty => 0,
            Contents::One(_) => 1,
            Contents::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Held instances in order; nothing for an empty handle
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        match &self.contents {
            Contents::Empty => <&[Resource]>::default().iter(),
            Contents::One(resource) => std::slice::from_ref(resource.as_ref()).iter(),
            Contents::Many(items) => items.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Resource> {
        match &mut self.contents {
            Contents::Empty => <&mut [Resource]>::default().iter_mut(),
            Contents::One(resource) => std::slice::from_mut(resource.as_mut()).iter_mut(),
            Contents::Many(items) => items.iter_mut(),
        }
    }

    /// The single held instance
    pub fn one(&self) -> Option<&Resource> {
        match &self.contents {
            Contents::One(resource) => Some(resource),
            _ => None,
        }
    }

    /// Positional access, only valid on list relations
    pub fn get(&self, index: usize) -> Result<Option<&Resource>> {
        match &self.contents {
            Contents::Many(items) => Ok(items.get(index)),
            _ => Err(Error::config(format!(
                "{} relation is not a list and cannot be indexed",
                self.kind
            ))),
        }
    }

    /// Replace the contents, rejecting instances of another kind
    pub fn set(&mut self, contents: Contents) -> Result<()> {
        let mismatch = match &contents {
            Contents::Empty => None,
            Contents::One(resource) => Some(resource.as_ref())
                .filter(|r| r.kind_name() != self.kind),
            Contents::Many(items) => items.iter().find(|r| r.kind_name() != self.kind),
        };

        if let Some(resource) = mismatch {
            return Err(Error::RelationType {
                expected: self.kind.clone(),
                actual: resource.kind_name().to_string(),
            });
        }

        self.contents = contents;
        Ok(())
    }

    /// Set contents coming from a response or a listing
    pub(crate) fn fill(&mut self, contents: Contents) -> Result<()> {
        self.set(contents)?;
        self.attempted = true;
        Ok(())
    }

    /// Mark an empty relation as settled without contents
    pub(crate) fn settle_empty(&mut self) {
        if self.is_empty() {
            self.attempted = true;
        }
    }

    /// Materialize the held instances
    ///
    /// A list relation is re-listed from its items as seeds; a single instance
    /// is loaded in place.
    pub fn load<'a>(&'a mut self, session: &'a Session, force: bool) -> BoxFuture<'a, Result<()>> {
        async move {
            let settled = self.is_loaded();

            match &mut self.contents {
                Contents::Empty => {}
                Contents::One(resource) => resource.load(session, force).await?,
                Contents::Many(items) => {
                    if !items.is_empty() && (force || !settled) {
                        tracing::debug!("re-listing {} {} seeds", items.len(), self.kind);
                        let request = ListRequest::new().seeds(items.clone());
                        let fresh = session.resources(&self.kind)?.list(request).await?;
                        *items = fresh;
                    }
                }
            }

            self.attempted = true;
            Ok(())
        }
        .boxed()
    }

    /// Load this relation, then materialize `paths` on every held instance
    pub fn fetch<'a>(
        &'a mut self,
        session: &'a Session,
        paths: &'a [String],
        force: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.load(session, force).await?;

            if !paths.is_empty() {
                try_join_all(
                    self.iter_mut()
                        .map(|resource| resource.fetch_relations(session, paths, force)),
                )
                .await?;
            }

            Ok(())
        }
        .boxed()
    }

    /// JSON rendering of the held instances
    pub fn to_json(&self) -> Value {
        match &self.contents {
            Contents::Empty if !self.attempted => Value::Null,
            Contents::Empty => Value::Array(Vec::new()),
            Contents::One(resource) => resource.to_json(),
            Contents::Many(items) => Value::Array(items.iter().map(Resource::to_json).collect()),
        }
    }
}

impl Serialize for RelationHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.contents {
            Contents::Empty if !self.attempted => serializer.serialize_unit(),
            Contents::Empty => serializer.collect_seq(std::iter::empty::<&Resource>()),
            Contents::One(resource) => resource.serialize(serializer),
            Contents::Many(items) => serializer.collect_seq(items),
        }
    }
}

impl<'a> IntoIterator for &'a RelationHandle {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
