//! High-level operations against a dqlite server.
//!
//! A [`Client`] owns one [`Protocol`] session plus a request and a response
//! buffer that are reset and reused for every call. Cluster management calls
//! (`cluster`, `add`, `assign`, `transfer`, `remove`) must be sent to the
//! leader, so a client normally comes from [`find_leader`].

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::connector::{Config, Connector};
use crate::context::Context;
use crate::dial::DialFunc;
use crate::error::{Error, Result};
use crate::protocol::request::{
    encode_add, encode_assign, encode_cluster, encode_dump, encode_exec, encode_exec_sql,
    encode_finalize, encode_leader, encode_open, encode_prepare, encode_query, encode_query_sql,
    encode_remove, encode_transfer,
};
use crate::protocol::response::{
    decode_db, decode_empty, decode_files, decode_node_compat, decode_nodes, decode_result,
    decode_rows, decode_stmt, ExecResult, StmtInfo,
};
use crate::protocol::{
    handshake, ClusterFormat, File, Message, NamedValue, Protocol, Rows, RowsStep, Value,
    VERSION_ONE,
};
use crate::store::{NodeInfo, NodeRole, NodeStore};

const BUFFER_SIZE: usize = 4096;

/// VFS that dqlite databases are opened with.
const VFS_NAME: &str = "volatile";

/// Connection options for [`Client::new`] and [`find_leader`].
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Client ID registered with the leader during discovery.
    pub id: u64,
    pub config: Config,
}

impl Options {
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_dial(mut self, dial: DialFunc) -> Self {
        self.config = self.config.with_dial(dial);
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_dial_timeout(timeout);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_attempt_timeout(timeout);
        self
    }

    pub fn with_backoff(mut self, factor: Duration, cap: Duration) -> Self {
        self.config = self.config.with_backoff(factor, cap);
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.config = self.config.with_retry_limit(limit);
        self
    }
}

/// Discovers the current leader through `store` and connects to it.
pub async fn find_leader(
    ctx: &Context,
    store: Arc<dyn NodeStore>,
    options: Options,
) -> Result<Client> {
    let connector = Connector::new(options.id, store, options.config);
    let protocol = connector.connect(ctx).await?;
    Ok(Client::from_protocol(protocol))
}

/// A session to one dqlite server.
pub struct Client {
    protocol: Protocol,
    request: Message,
    response: Message,
}

impl Client {
    /// Connects to the server at `address` without leader discovery.
    pub async fn new(ctx: &Context, address: &str, options: Options) -> Result<Self> {
        let dial = if options.config.dial_timeout.is_zero() {
            ctx.clone()
        } else {
            ctx.with_timeout(options.config.dial_timeout)
        };
        let conn = dial
            .run((options.config.dial)(address.to_string()))
            .await
            .map_err(|source| Error::Dial {
                address: address.to_string(),
                source,
            })?;

        let protocol = handshake(ctx, conn, VERSION_ONE).await?;
        debug!(address, "connected");
        Ok(Self::from_protocol(protocol))
    }

    pub fn from_protocol(protocol: Protocol) -> Self {
        Self {
            protocol,
            request: Message::new(BUFFER_SIZE),
            response: Message::new(BUFFER_SIZE),
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Sends whatever is encoded in the request buffer and reads one response.
    async fn call(&mut self, ctx: &Context) -> Result<()> {
        self.response.reset();
        let result = self
            .protocol
            .call(ctx, &self.request, &mut self.response)
            .await;
        self.request.reset();
        result
    }

    /// Returns the leader as known by this server, `None` if there is none.
    pub async fn leader(&mut self, ctx: &Context) -> Result<Option<NodeInfo>> {
        encode_leader(&mut self.request);
        self.call(ctx).await?;

        let (id, address) = decode_node_compat(self.protocol.version(), &mut self.response)?;
        if address.is_empty() {
            return Ok(None);
        }
        Ok(Some(NodeInfo::new(id, address, NodeRole::Voter)))
    }

    /// Returns every node in the cluster with its role.
    pub async fn cluster(&mut self, ctx: &Context) -> Result<Vec<NodeInfo>> {
        encode_cluster(&mut self.request, ClusterFormat::V1);
        self.call(ctx).await?;
        decode_nodes(&mut self.response, ClusterFormat::V1)
    }

    /// Fetches the database file and WAL of `name`.
    pub async fn dump(&mut self, ctx: &Context, name: &str) -> Result<Vec<File>> {
        encode_dump(&mut self.request, name);
        self.call(ctx).await?;
        decode_files(&mut self.response)
    }

    /// Adds a node to the cluster and gives it `node.role`.
    ///
    /// New nodes join as spares, so no Assign request is sent for that role.
    pub async fn add(&mut self, ctx: &Context, node: &NodeInfo) -> Result<()> {
        encode_add(&mut self.request, node.id, &node.address);
        self.call(ctx).await?;
        decode_empty(&mut self.response)?;

        if node.role == NodeRole::Spare {
            return Ok(());
        }
        self.assign(ctx, node.id, node.role).await
    }

    /// Changes the role of node `id`.
    pub async fn assign(&mut self, ctx: &Context, id: u64, role: NodeRole) -> Result<()> {
        encode_assign(&mut self.request, id, role);
        self.call(ctx).await?;
        decode_empty(&mut self.response)
    }

    /// Hands leadership over to node `id`.
    pub async fn transfer(&mut self, ctx: &Context, id: u64) -> Result<()> {
        encode_transfer(&mut self.request, id);
        self.call(ctx).await?;
        decode_empty(&mut self.response)
    }

    pub async fn remove(&mut self, ctx: &Context, id: u64) -> Result<()> {
        encode_remove(&mut self.request, id);
        self.call(ctx).await?;
        decode_empty(&mut self.response)
    }

    /// Opens (or creates) the database `name` on the server.
    pub async fn open(&mut self, ctx: &Context, name: &str) -> Result<Database<'_>> {
        encode_open(&mut self.request, name, 0, VFS_NAME);
        self.call(ctx).await?;
        let id = decode_db(&mut self.response)?;
        Ok(Database { client: self, id })
    }

    pub async fn close(self) -> Result<()> {
        self.protocol.close().await
    }
}

/// An open database on the server.
pub struct Database<'a> {
    client: &'a mut Client,
    id: u32,
}

/// A prepared statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    pub db: u32,
    pub id: u32,
    /// Number of parameters the statement expects.
    pub params: u64,
}

impl From<StmtInfo> for Statement {
    fn from(info: StmtInfo) -> Self {
        Self {
            db: info.db,
            id: info.id,
            params: info.params,
        }
    }
}

fn named(params: &[Value]) -> Result<Vec<NamedValue>> {
    if params.len() > usize::from(u8::MAX) {
        return Err(Error::Malformed(format!(
            "too many parameters ({})",
            params.len()
        )));
    }
    Ok(NamedValue::from_values(params))
}

impl<'a> Database<'a> {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Runs `sql`, which may hold several statements, with `params` bound.
    pub async fn exec_sql(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecResult> {
        let params = named(params)?;
        encode_exec_sql(&mut self.client.request, u64::from(self.id), sql, &params);
        self.client.call(ctx).await?;
        decode_result(&mut self.client.response)
    }

    /// Starts a transaction.
    pub async fn begin(&mut self, ctx: &Context) -> Result<()> {
        self.exec_sql(ctx, "BEGIN", &[]).await.map(|_| ())
    }

    pub async fn commit(&mut self, ctx: &Context) -> Result<()> {
        self.exec_sql(ctx, "COMMIT", &[]).await.map(|_| ())
    }

    pub async fn rollback(&mut self, ctx: &Context) -> Result<()> {
        self.exec_sql(ctx, "ROLLBACK", &[]).await.map(|_| ())
    }

    /// Runs a query and returns a cursor over its rows.
    pub async fn query_sql(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryRows<'_>> {
        let params = named(params)?;
        encode_query_sql(&mut self.client.request, u64::from(self.id), sql, &params);
        self.client.call(ctx).await?;
        QueryRows::start(self.client, self.id)
    }

    pub async fn prepare(&mut self, ctx: &Context, sql: &str) -> Result<Statement> {
        encode_prepare(&mut self.client.request, u64::from(self.id), sql);
        self.client.call(ctx).await?;
        decode_stmt(&mut self.client.response).map(Statement::from)
    }

    pub async fn exec(
        &mut self,
        ctx: &Context,
        stmt: &Statement,
        params: &[Value],
    ) -> Result<ExecResult> {
        let params = named(params)?;
        encode_exec(&mut self.client.request, stmt.db, stmt.id, &params);
        self.client.call(ctx).await?;
        decode_result(&mut self.client.response)
    }

    pub async fn query(
        &mut self,
        ctx: &Context,
        stmt: &Statement,
        params: &[Value],
    ) -> Result<QueryRows<'_>> {
        let params = named(params)?;
        encode_query(&mut self.client.request, stmt.db, stmt.id, &params);
        self.client.call(ctx).await?;
        QueryRows::start(self.client, self.id)
    }

    /// Releases a prepared statement on the server.
    pub async fn finalize(&mut self, ctx: &Context, stmt: Statement) -> Result<()> {
        encode_finalize(&mut self.client.request, stmt.db, stmt.id);
        self.client.call(ctx).await?;
        decode_empty(&mut self.client.response)
    }
}

/// Rows of a query, possibly spread over several responses.
///
/// Either read until `next` returns `None` or call [`QueryRows::close`].
/// Dropping the cursor while the server still has responses queued leaves
/// the session out of step, so it is marked broken.
pub struct QueryRows<'a> {
    client: &'a mut Client,
    rows: Rows,
    db: u32,
    consumed: bool,
}

impl<'a> QueryRows<'a> {
    fn start(client: &'a mut Client, db: u32) -> Result<Self> {
        let rows = decode_rows(&mut client.response)?;
        Ok(Self {
            client,
            rows,
            db,
            consumed: false,
        })
    }

    pub fn columns(&self) -> &[String] {
        self.rows.columns()
    }

    /// Type names of the columns in the upcoming row.
    pub fn column_types(&mut self) -> Result<Vec<&'static str>> {
        self.rows.column_types(&mut self.client.response)
    }

    /// Returns the next row, fetching further responses as needed.
    pub async fn next(&mut self, ctx: &Context) -> Result<Option<Vec<Value>>> {
        if self.consumed {
            return Ok(None);
        }
        loop {
            match self.rows.next(&mut self.client.response)? {
                RowsStep::Row(values) => return Ok(Some(values)),
                RowsStep::Done => {
                    self.consumed = true;
                    return Ok(None);
                }
                RowsStep::Part => {
                    self.client.response.reset();
                    self.client
                        .protocol
                        .more(ctx, &mut self.client.response)
                        .await?;
                    self.rows = decode_rows(&mut self.client.response)?;
                }
            }
        }
    }

    /// Stops reading, interrupting the query if the server has more to send.
    pub async fn close(mut self, ctx: &Context) -> Result<()> {
        if self.consumed {
            return Ok(());
        }
        let pending = matches!(
            self.rows.trailing_marker(&self.client.response),
            Ok(RowsStep::Part)
        );
        self.consumed = true;
        if !pending {
            return Ok(());
        }

        debug!(db = self.db, "interrupting pending query");
        let client = &mut *self.client;
        client
            .protocol
            .interrupt(
                ctx,
                u64::from(self.db),
                &mut client.request,
                &mut client.response,
            )
            .await
    }
}

impl Drop for QueryRows<'_> {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        if let Ok(RowsStep::Part) = self.rows.trailing_marker(&self.client.response) {
            self.client
                .protocol
                .mark_broken("result set dropped with responses pending");
        }
    }
}
