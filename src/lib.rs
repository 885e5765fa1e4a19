//! Navigable, lazily-loaded resource graph over cloud control-plane APIs
//!
//! - [`client`] - transports and the per-session client registry
//! - [`resource`] - kinds, instances, relations and the fetcher
//! - [`query`] - Filter/Exclude over instances and their relations
//! - [`config`] - persisted CLI configuration

pub mod client;
pub mod config;
pub mod error;
pub mod query;
pub mod resource;

pub use client::{ClientRegistry, HttpFactory, Params, PoolConfig, ReplayFactory, Transport};
pub use error::{Error, Result};
pub use query::{Exclude, Filter, Predicate};
pub use resource::{
    Catalog, FieldValue, ListRequest, RelationHandle, Resource, Resources, Session,
};
