//! Resource graph layer
//!
//! Resource kinds are described by static descriptors loaded from JSON
//! files at compile time, so new kinds can be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Descriptor types and the built-in catalog
//! - [`kind`] - Sessions, kinds bound to clients, and the query surface
//! - [`fetcher`] - List/describe with pagination and chunked describes
//! - [`normalize`] - Wire records to canonical fields and relations
//! - [`relation`] - Lazily materialized relation handles
//! - [`capability`] - Relations filled by follow-up listings
//! - [`timeseries`] - Metric statistics and alarm history over a time window
//!
//! # Resource Definitions
//!
//! Kinds are defined in JSON files under `src/resources/`:
//! - `ec2.json` - security groups, instances, images
//! - `autoscaling.json` - auto scaling groups, launch configurations, policies
//! - `ecs.json` - clusters, services, tasks, container instances
//! - `elb.json` - application and classic load balancers, target groups
//! - `rds.json` - database clusters/instances, cache clusters and nodes
//! - `cloudwatch.json` - metrics and alarms
//!
//! # Example
//!
//! ```ignore
//! use cloudgraph::resource::Session;
//!
//! async fn prod_groups(session: &Session) -> cloudgraph::Result<()> {
//!     let groups = session
//!         .resources("asg")?
//!         .filter([("name__icontains", "prod".into())])
//!         .await?;
//!     for group in &groups {
//!         println!("{}", group.identity());
//!     }
//!     Ok(())
//! }
//! ```

pub mod capability;
pub mod case;
pub mod fetcher;
pub mod instance;
pub mod kind;
pub(crate) mod normalize;
pub mod registry;
pub mod relation;
pub mod timeseries;

pub use capability::Capability;
pub use fetcher::PaginatedFetcher;
pub use instance::{FieldValue, Resource, PATH_SEPARATOR};
pub use kind::{ListRequest, ResourceKind, Resources, Session, SessionBuilder, WITH_RELATED};
pub use registry::{
    builtin_catalog, CallDef, Catalog, Lookup, Pagination, ParamCase, ParamDef, ParamKind,
    ResourceDescriptor, DEFAULT_CHUNK_SIZE,
};
pub use relation::{Contents, RelationHandle};
pub use timeseries::{alarm_history, metric_statistics, HistoryRequest, StatisticsRequest};
