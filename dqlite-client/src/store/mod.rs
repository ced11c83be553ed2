//! Persistence for the list of candidate dqlite servers.
//!
//! The connector reads the list at the start of every discovery pass, so a
//! store may be updated while a client is running. Three backends are
//! provided:
//!
//! - [`InMemoryNodeStore`]: lives as long as the process
//! - [`YamlNodeStore`]: a human-editable YAML file, replaced atomically
//! - [`TableNodeStore`]: rows in a SQLite table, replaced in one transaction

mod file;
mod memory;
mod table;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Context;
use crate::error::Result;

pub use file::YamlNodeStore;
pub use memory::InMemoryNodeStore;
pub use table::TableNodeStore;

/// Role of a node in the Raft cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u64", try_from = "u64")]
pub enum NodeRole {
    /// Takes part in quorum and can become leader.
    #[default]
    Voter,
    /// Replicates the log but does not vote.
    StandBy,
    /// Neither replicates nor votes.
    Spare,
}

impl From<NodeRole> for u64 {
    fn from(role: NodeRole) -> u64 {
        match role {
            NodeRole::Voter => 0,
            NodeRole::StandBy => 1,
            NodeRole::Spare => 2,
        }
    }
}

impl TryFrom<u64> for NodeRole {
    type Error = StoreError;

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeRole::Voter),
            1 => Ok(NodeRole::StandBy),
            2 => Ok(NodeRole::Spare),
            other => Err(StoreError::InvalidRole(other)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Voter => "voter",
            NodeRole::StandBy => "stand-by",
            NodeRole::Spare => "spare",
        };
        f.write_str(name)
    }
}

/// A server in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Role", default)]
    pub role: NodeRole,
}

impl NodeInfo {
    pub fn new(id: u64, address: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id,
            address: address.into(),
            role,
        }
    }
}

/// Source of candidate servers for leader discovery.
///
/// Implementations must tolerate concurrent `get` and `set` calls.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Returns the current list, in the order it was stored.
    async fn get(&self, ctx: &Context) -> Result<Vec<NodeInfo>>;

    /// Replaces the whole list. On error the previous list is left intact.
    async fn set(&self, ctx: &Context, nodes: &[NodeInfo]) -> Result<()>;
}

/// Errors raised by the node store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid node role {0}")]
    InvalidRole(u64),
}

/// Drops entries whose address already appeared earlier in the list.
pub(crate) fn dedup_by_address(nodes: &[NodeInfo]) -> Vec<NodeInfo> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|node| seen.insert(node.address.as_str()))
        .cloned()
        .collect()
}

/// Fails fast when the caller's context is already done.
fn check(ctx: &Context) -> Result<()> {
    match ctx.err() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
