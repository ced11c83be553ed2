use async_trait::async_trait;
use parking_lot::RwLock;

use super::{check, dedup_by_address, NodeInfo, NodeStore};
use crate::context::Context;
use crate::error::Result;

/// Node list kept in process memory only.
#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<Vec<NodeInfo>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `nodes`.
    pub fn with_nodes(nodes: &[NodeInfo]) -> Self {
        Self {
            nodes: RwLock::new(dedup_by_address(nodes)),
        }
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn get(&self, ctx: &Context) -> Result<Vec<NodeInfo>> {
        check(ctx)?;
        Ok(self.nodes.read().clone())
    }

    async fn set(&self, ctx: &Context, nodes: &[NodeInfo]) -> Result<()> {
        check(ctx)?;
        *self.nodes.write() = dedup_by_address(nodes);
        Ok(())
    }
}
