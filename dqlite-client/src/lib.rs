//! Client for the leader of a dqlite cluster.
//!
//! dqlite replicates SQLite databases with Raft. Only the current leader
//! accepts queries and membership changes, so a client first has to find it.
//! Callers hand this crate a list of candidate addresses (a [`store::NodeStore`])
//! and get back a session bound to whichever server is leader right now.
//!
//! # Modules
//!
//! - [`context`]: Deadlines and cancellation threaded through every call
//! - [`error`]: The crate-wide error type
//! - [`protocol`]: Wire format, request/response codecs, and the session that
//!   serialises calls over one connection
//! - [`dial`]: Default TCP/Unix dialers and the pluggable dial function type
//! - [`connector`]: Leader discovery with exponential backoff and legacy
//!   protocol fallback
//! - [`store`]: Persistence for the candidate server list (memory, YAML file,
//!   SQLite table)
//! - [`client`]: High-level cluster and database operations on top of a session
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use dqlite_client::client::{self, Options};
//! use dqlite_client::context::Context;
//! use dqlite_client::store::{InMemoryNodeStore, NodeInfo, NodeRole, NodeStore};
//!
//! # async fn demo() -> dqlite_client::Result<()> {
//! let ctx = Context::background().with_timeout(Duration::from_secs(10));
//! let store = Arc::new(InMemoryNodeStore::new());
//! store
//!     .set(&ctx, &[NodeInfo::new(1, "10.0.0.1:9001", NodeRole::Voter)])
//!     .await?;
//!
//! let mut client = client::find_leader(&ctx, store, Options::default()).await?;
//! for node in client.cluster(&ctx).await? {
//!     println!("{} {} {}", node.id, node.address, node.role);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connector;
pub mod context;
pub mod dial;
pub mod error;
pub mod protocol;
pub mod store;

pub use error::{Error, Result};
