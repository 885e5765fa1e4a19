//! Control-plane transport layer
//!
//! The engine never talks to the network itself. It asks a
//! [`ClientRegistry`] for one [`Transport`] per logical service name and
//! invokes calls by name with a parameter record.
//!
//! # Module Structure
//!
//! - [`transport`] - The `Transport` capability and the factory that builds it
//! - [`registry`] - Per-session client cache, region/account helpers
//! - [`http`] - JSON-over-HTTP transport for a control-plane gateway
//! - [`replay`] - Scripted transport that replays recorded responses
//!
//! # Example
//!
//! ```ignore
//! use cloudgraph::client::{ClientRegistry, HttpFactory, PoolConfig};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let factory = HttpFactory::new("https://gateway.internal")?;
//!     let registry = ClientRegistry::new(factory, "us-east-1", PoolConfig::default());
//!     let ec2 = registry.get("ec2")?;
//!     let groups = ec2.invoke("describe_security_groups", &Default::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod registry;
pub mod replay;
pub mod transport;

pub use http::{HttpFactory, HttpTransport};
pub use registry::ClientRegistry;
pub use replay::{RecordedCall, ReplayFactory, ScriptedCall};
pub use transport::{Params, PoolConfig, Transport, TransportFactory};
