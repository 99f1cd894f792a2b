//! # kvlease
//!
//! A DHCPv4 lease allocation engine whose entire configuration lives in a
//! key-value store.
//!
//! ## Features
//!
//! - Static MAC-to-address bindings, checked before any dynamic pool
//! - Dynamic pools per network, matched by MAC range or explicit membership
//! - Conflict-free pool allocation through create-if-absent store writes
//! - Best-effort network loading: only the subnet is required
//! - In-memory, file-backed and etcd stores
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvlease::{Config, Hooks, RequestContext, Reply};
//!
//! #[tokio::main]
//! async fn main() -> kvlease::Result<()> {
//!     let config = Config::load_or_create("kvlease.json").await?;
//!     let hooks = Hooks::load(&config).await?;
//!
//!     let mut context = RequestContext::new();
//!     let mut reply = Reply::new();
//!     hooks.on_receive(&mut context, "aa:bb:cc:dd:ee:ff").await;
//!     hooks.on_send(&context, &mut reply);
//!
//!     hooks.unload().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`LeaseEngine`] - Resolves a MAC to an [`Assignment`] or [`NoAssignment`]
//! - [`NetworkDescriptor`] - One network's configuration, loaded per request
//! - [`PoolAllocator`] - Offset-based dynamic pools
//! - [`Store`] - Key-value store interface ([`MemoryStore`], `EtcdStore`)
//! - [`Hooks`] - Adapter for a host DHCP server
//! - [`Admin`] - Writes networks, members and bindings into the store

pub mod address;
pub mod admin;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod network;
pub mod options;
pub mod pool;
pub mod store;

/// Crate version, for host compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use admin::{Admin, NetworkSpec, Topology};
pub use config::{Config, StoreConfig};
pub use engine::{Assignment, EngineSettings, LeaseEngine};
pub use error::{Error, NoAssignment, Result};
pub use hooks::{CalloutStatus, Hooks, OutgoingPacket, Reply, RequestContext};
pub use network::NetworkDescriptor;
pub use options::DhcpOption;
pub use pool::PoolAllocator;
pub use store::{MemoryStore, Store, StoreClient};
