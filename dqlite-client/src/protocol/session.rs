//! One connection to a dqlite server, serialised to a single call at a time.
//!
//! dqlite servers do not support concurrent requests on a connection, so
//! [`Protocol`] holds the socket behind a `tokio::sync::Mutex` and every call
//! writes its request and reads its response while holding the lock.
//!
//! A transport failure in the middle of a call leaves the stream at an unknown
//! frame boundary. The session records the failure under the same lock and
//! fails every later call immediately with [`Error::Broken`].

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::constants::ResponseType;
use super::message::{Message, HEADER_SIZE};
use super::request::encode_interrupt;
use crate::context::Context;
use crate::dial::Conn;
use crate::error::{Error, Result};

/// Zero-byte reads tolerated in a row before giving up on the peer.
const MAX_CONSECUTIVE_EMPTY_READS: usize = 100;

struct Session {
    conn: Option<Box<dyn Conn>>,
    net_err: Option<String>,
}

impl Session {
    fn conn(&mut self) -> Result<&mut Box<dyn Conn>> {
        if let Some(reason) = &self.net_err {
            return Err(Error::Broken {
                reason: reason.clone(),
            });
        }
        self.conn.as_mut().ok_or(Error::Closed)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_connection_fatal() && self.net_err.is_none() {
                debug!(error = %err, "marking connection as broken");
                self.net_err = Some(err.to_string());
            }
        }
        result
    }
}

/// A version-negotiated connection to a single dqlite server.
pub struct Protocol {
    version: u64,
    session: Mutex<Session>,
    heartbeat_timeout: Option<Duration>,
}

/// Sends the protocol version and wraps the connection in a session.
///
/// No response is expected to the handshake itself.
pub async fn handshake(ctx: &Context, mut conn: Box<dyn Conn>, version: u64) -> Result<Protocol> {
    let send = async {
        conn.write_all(&version.to_le_bytes()).await?;
        conn.flush().await
    };
    ctx.run(send).await.map_err(Error::Handshake)?;

    Ok(Protocol::new(version, conn))
}

impl Protocol {
    pub fn new(version: u64, conn: Box<dyn Conn>) -> Self {
        Self {
            version,
            session: Mutex::new(Session {
                conn: Some(conn),
                net_err: None,
            }),
            heartbeat_timeout: None,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Heartbeat timeout announced in the server's Welcome response.
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout
    }

    pub(crate) fn set_heartbeat_timeout(&mut self, timeout: Duration) {
        self.heartbeat_timeout = Some(timeout);
    }

    /// True once a call has failed at the transport level or the session was closed.
    pub async fn is_broken(&self) -> bool {
        let session = self.session.lock().await;
        session.net_err.is_some() || session.conn.is_none()
    }

    /// Sends `request` and reads one response into `response`.
    ///
    /// The context deadline bounds the whole exchange.
    pub async fn call(
        &self,
        ctx: &Context,
        request: &Message,
        response: &mut Message,
    ) -> Result<()> {
        let mut session = self.session.lock().await;
        let budget = ctx.remaining();
        let conn = session.conn()?;

        let result = match ctx.run(write_message(conn, request)).await {
            Err(source) => Err(Error::Send { budget, source }),
            Ok(()) => ctx
                .run(read_message(conn, response))
                .await
                .map_err(|source| Error::Receive { budget, source }),
        };
        session.record(result)
    }

    /// Reads one more response for a request that yields several.
    pub async fn more(&self, ctx: &Context, response: &mut Message) -> Result<()> {
        let mut session = self.session.lock().await;
        let budget = ctx.remaining();
        let conn = session.conn()?;

        let result = ctx
            .run(read_message(conn, response))
            .await
            .map_err(|source| Error::Receive { budget, source });
        session.record(result)
    }

    /// Interrupts the multi-response request running against database `db`.
    ///
    /// Responses still in flight are read and discarded until the server
    /// acknowledges with an Empty response.
    pub async fn interrupt(
        &self,
        ctx: &Context,
        db: u64,
        request: &mut Message,
        response: &mut Message,
    ) -> Result<()> {
        let mut session = self.session.lock().await;
        let budget = ctx.remaining();
        let conn = session.conn()?;

        request.reset();
        encode_interrupt(request, db);

        let result = match ctx.run(write_message(conn, request)).await {
            Err(source) => Err(Error::Send { budget, source }),
            Ok(()) => loop {
                if let Err(source) = ctx.run(read_message(conn, response)).await {
                    break Err(Error::Receive { budget, source });
                }
                if response.mtype() == u8::from(ResponseType::Empty) {
                    break Ok(());
                }
            },
        };
        session.record(result)
    }

    /// Marks the session unusable without touching the socket.
    ///
    /// Returns false if the lock is held by a call in progress.
    pub(crate) fn mark_broken(&self, reason: &str) -> bool {
        match self.session.try_lock() {
            Ok(mut session) => {
                if session.net_err.is_none() {
                    session.net_err = Some(reason.to_string());
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Shuts the connection down. Later calls fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.conn.take() {
            Some(mut conn) => conn.shutdown().await.map_err(|source| Error::Send {
                budget: None,
                source,
            }),
            None => Ok(()),
        }
    }
}

/// Writes a sealed message: header, then body.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(message.header()).await?;
    writer.write_all(message.body()).await?;
    writer.flush().await
}

/// Reads one frame into `message`, replacing its previous contents.
pub async fn read_message<R>(reader: &mut R, message: &mut Message) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    read_full(reader, &mut header).await?;
    let body = message.prepare_receive(header);
    read_full(reader, body).await
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut offset = 0;
    while offset < buf.len() {
        offset += read_some(reader, &mut buf[offset..]).await?;
    }
    Ok(())
}

/// Performs reads until one returns data, giving up after a run of empty ones.
async fn read_some<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    for _ in 0..MAX_CONSECUTIVE_EMPTY_READS {
        let n = reader.read(buf).await?;
        if n > 0 {
            return Ok(n);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "no progress: multiple reads returned no data",
    ))
}
