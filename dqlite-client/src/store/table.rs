use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use super::{check, dedup_by_address, NodeInfo, NodeRole, NodeStore, StoreError};
use crate::context::Context;
use crate::error::Result;

/// Node list kept in a SQLite table.
///
/// Each `set` deletes every row and inserts the new list inside a single
/// transaction, so a failure part-way leaves the table as it was. All
/// database work runs on the blocking thread pool.
#[derive(Clone)]
pub struct TableNodeStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    filter: Option<String>,
}

impl TableNodeStore {
    /// Opens (or creates) the database at `path` and ensures `table` exists.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), table))]
    pub fn open(path: impl AsRef<Path>, table: &str) -> std::result::Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn, table)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(table: &str) -> std::result::Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, table)
    }

    /// Uses an existing connection, creating `table` if it is missing.
    pub fn from_connection(conn: Connection, table: &str) -> std::result::Result<Self, StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id INTEGER NOT NULL,
                address TEXT UNIQUE NOT NULL,
                role INTEGER NOT NULL DEFAULT 0
            )"
        ))?;
        debug!(table, "opened node table");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
            filter: None,
        })
    }

    /// Restricts `get` to rows matching a SQL predicate, e.g. `role = 0`.
    ///
    /// `set` still replaces the whole table.
    pub fn with_filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    fn select_sql(&self) -> String {
        match &self.filter {
            Some(predicate) => format!(
                "SELECT id, address, role FROM \"{}\" WHERE {} ORDER BY rowid",
                self.table, predicate
            ),
            None => format!(
                "SELECT id, address, role FROM \"{}\" ORDER BY rowid",
                self.table
            ),
        }
    }
}

fn read_nodes(conn: &mut Connection, sql: &str) -> std::result::Result<Vec<NodeInfo>, StoreError> {
    let tx = conn.transaction()?;
    let rows = {
        let mut stmt = tx.prepare(sql)?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        mapped.collect::<std::result::Result<Vec<_>, _>>()?
    };
    tx.commit()?;

    rows.into_iter()
        .map(|(id, address, role)| -> std::result::Result<NodeInfo, StoreError> {
            Ok(NodeInfo {
                id: id as u64,
                address,
                role: NodeRole::try_from(role as u64)?,
            })
        })
        .collect()
}

fn replace_nodes(
    conn: &mut Connection,
    table: &str,
    nodes: &[NodeInfo],
) -> std::result::Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute(&format!("DELETE FROM \"{table}\""), [])?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO \"{table}\" (id, address, role) VALUES (?1, ?2, ?3)"
        ))?;
        for node in nodes {
            stmt.execute(params![
                node.id as i64,
                node.address,
                u64::from(node.role) as i64
            ])?;
        }
    }
    // Dropping an uncommitted transaction rolls it back.
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl NodeStore for TableNodeStore {
    async fn get(&self, ctx: &Context) -> Result<Vec<NodeInfo>> {
        check(ctx)?;
        let conn = self.conn.clone();
        let sql = self.select_sql();
        let nodes = tokio::task::spawn_blocking(move || read_nodes(&mut conn.lock(), &sql))
            .await
            .map_err(StoreError::from)??;
        Ok(nodes)
    }

    async fn set(&self, ctx: &Context, nodes: &[NodeInfo]) -> Result<()> {
        check(ctx)?;
        let conn = self.conn.clone();
        let table = self.table.clone();
        let nodes = dedup_by_address(nodes);
        let count = nodes.len();
        tokio::task::spawn_blocking(move || replace_nodes(&mut conn.lock(), &table, &nodes))
            .await
            .map_err(StoreError::from)??;

        debug!(table = %self.table, count, "node table replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<NodeInfo> {
        vec![
            NodeInfo::new(1, "10.0.0.1:9001", NodeRole::Voter),
            NodeInfo::new(2, "10.0.0.2:9001", NodeRole::StandBy),
            NodeInfo::new(3, "10.0.0.3:9001", NodeRole::Spare),
        ]
    }

    #[tokio::test]
    async fn set_then_get_preserves_order() {
        let ctx = Context::background();
        let store = TableNodeStore::open_in_memory("servers").unwrap();
        store.set(&ctx, &sample()).await.unwrap();
        assert_eq!(store.get(&ctx).await.unwrap(), sample());

        store.set(&ctx, &sample()[..1]).await.unwrap();
        assert_eq!(store.get(&ctx).await.unwrap(), sample()[..1].to_vec());
    }

    #[tokio::test]
    async fn filter_restricts_get() {
        let ctx = Context::background();
        let store = TableNodeStore::open_in_memory("servers")
            .unwrap()
            .with_filter("role = 0");
        store.set(&ctx, &sample()).await.unwrap();
        let voters = store.get(&ctx).await.unwrap();
        assert_eq!(voters, vec![NodeInfo::new(1, "10.0.0.1:9001", NodeRole::Voter)]);
    }

    #[tokio::test]
    async fn failed_set_rolls_back() {
        let ctx = Context::background();
        let store = TableNodeStore::open_in_memory("servers").unwrap();
        store.set(&ctx, &sample()).await.unwrap();

        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON servers
                 WHEN NEW.address = 'bad:1'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store
            .set(
                &ctx,
                &[
                    NodeInfo::new(9, "good:1", NodeRole::Voter),
                    NodeInfo::new(10, "bad:1", NodeRole::Voter),
                ],
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::Sqlite(_)))
        ));
        assert_eq!(store.get(&ctx).await.unwrap(), sample());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.db");
        let ctx = Context::background();

        TableNodeStore::open(&path, "servers")
            .unwrap()
            .set(&ctx, &sample())
            .await
            .unwrap();
        let reopened = TableNodeStore::open(&path, "servers").unwrap();
        assert_eq!(reopened.get(&ctx).await.unwrap(), sample());
    }

    #[tokio::test]
    async fn duplicate_addresses_keep_first() {
        let ctx = Context::background();
        let store = TableNodeStore::open_in_memory("servers").unwrap();
        store
            .set(
                &ctx,
                &[
                    NodeInfo::new(1, "a:1", NodeRole::Voter),
                    NodeInfo::new(2, "a:1", NodeRole::Spare),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            store.get(&ctx).await.unwrap(),
            vec![NodeInfo::new(1, "a:1", NodeRole::Voter)]
        );
    }
}
