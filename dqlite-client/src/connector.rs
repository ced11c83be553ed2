//! Leader discovery.
//!
//! A [`Connector`] walks the candidate servers in a [`NodeStore`] and returns
//! a session to whichever one is the current Raft leader:
//!
//! 1. Dial the candidate and send the protocol version.
//! 2. Ask it who the leader is.
//! 3. If it names itself, register as a client and return the session.
//!    If it names another server, follow that hint once. If it knows no
//!    leader, move on to the next candidate.
//!
//! A pass that finds no leader is retried with exponential backoff until the
//! context ends or the retry limit is used up.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::Context;
use crate::dial::{default_dial_func, DialFunc};
use crate::error::{Error, Result};
use crate::protocol::request::{encode_client, encode_leader};
use crate::protocol::response::{decode_node_compat, decode_welcome};
use crate::protocol::{handshake, Message, Protocol, VERSION_LEGACY, VERSION_ONE};
use crate::store::NodeStore;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(1);

/// Connection parameters for leader discovery.
#[derive(Clone)]
pub struct Config {
    pub dial: DialFunc,
    /// Bound on establishing one network connection.
    pub dial_timeout: Duration,
    /// Bound on probing one candidate, including a redirect.
    pub attempt_timeout: Duration,
    pub backoff_factor: Duration,
    pub backoff_cap: Duration,
    /// Number of discovery passes before giving up, 0 for no limit.
    pub retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dial: default_dial_func(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            retry_limit: 0,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("dial_timeout", &self.dial_timeout)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("backoff_factor", &self.backoff_factor)
            .field("backoff_cap", &self.backoff_cap)
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn with_dial(mut self, dial: DialFunc) -> Self {
        self.dial = dial;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, factor: Duration, cap: Duration) -> Self {
        self.backoff_factor = factor;
        self.backoff_cap = cap;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    fn backoff(&self) -> Backoff {
        Backoff {
            factor: self.backoff_factor,
            cap: self.backoff_cap,
        }
    }
}

/// Binary exponential backoff with an upper bound.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub factor: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// `factor * 2^attempt`, never more than the cap.
    ///
    /// Overflow and zero results both yield the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = 1u32
            .checked_shl(attempt)
            .and_then(|multiplier| self.factor.checked_mul(multiplier));
        match delay {
            Some(delay) if !delay.is_zero() && delay <= self.cap => delay,
            _ => self.cap,
        }
    }
}

/// Outcome of probing a single address.
enum Probe {
    /// The server is the leader and welcomed us.
    Leader(Protocol),
    /// The server named another server as leader.
    Redirect(String),
    /// The server does not know the leader.
    Unknown,
    /// The server hung up on the current protocol version.
    BadProtocol,
}

/// Finds the cluster leader and opens a session to it.
pub struct Connector {
    id: u64,
    store: Arc<dyn NodeStore>,
    config: Config,
}

impl Connector {
    /// Creates a connector that registers with the leader as client `id`.
    ///
    /// Zero durations in `config` fall back to their defaults.
    pub fn new(id: u64, store: Arc<dyn NodeStore>, mut config: Config) -> Self {
        if config.dial_timeout.is_zero() {
            config.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if config.attempt_timeout.is_zero() {
            config.attempt_timeout = DEFAULT_ATTEMPT_TIMEOUT;
        }
        if config.backoff_factor.is_zero() {
            config.backoff_factor = DEFAULT_BACKOFF_FACTOR;
        }
        if config.backoff_cap.is_zero() {
            config.backoff_cap = DEFAULT_BACKOFF_CAP;
        }
        Self { id, store, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs discovery passes until a leader is found.
    ///
    /// Returns [`Error::NoAvailableLeader`] when the retry limit is reached or
    /// `ctx` ends first. A session is only ever returned once the leader has
    /// welcomed this client.
    pub async fn connect(&self, ctx: &Context) -> Result<Protocol> {
        let backoff = self.config.backoff();
        let mut attempt: u32 = 0;

        loop {
            if self.config.retry_limit > 0 && attempt >= self.config.retry_limit {
                debug!(attempts = attempt, "retry limit reached");
                return Err(Error::NoAvailableLeader);
            }

            if attempt > 0 {
                let delay = backoff.delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.done() => {}
                }
            }

            if let Some(err) = ctx.err() {
                debug!(attempt, error = %err, "context done, giving up");
                return Err(Error::NoAvailableLeader);
            }

            match self.connect_attempt_all(ctx, attempt).await {
                Ok(Some(protocol)) => {
                    if ctx.is_done() {
                        let _ = protocol.close().await;
                        return Err(Error::NoAvailableLeader);
                    }
                    return Ok(protocol);
                }
                Ok(None) => {}
                Err(err) => warn!(attempt, error = %err, "discovery pass failed"),
            }

            attempt = attempt.saturating_add(1);
        }
    }

    /// One pass over every candidate in the store.
    async fn connect_attempt_all(&self, ctx: &Context, attempt: u32) -> Result<Option<Protocol>> {
        let servers = self.store.get(ctx).await?;

        for server in servers {
            let address = server.address.as_str();
            let ctx = ctx.with_timeout(self.config.attempt_timeout);

            let mut version = VERSION_ONE;
            let mut probe = self.connect_attempt_one(&ctx, address, version).await;
            if matches!(probe, Ok(Probe::BadProtocol)) {
                debug!(attempt, address, "retrying with legacy protocol");
                version = VERSION_LEGACY;
                probe = self.connect_attempt_one(&ctx, address, version).await;
            }

            let leader = match probe {
                Ok(Probe::Leader(protocol)) => {
                    debug!(attempt, address, version, "connected");
                    return Ok(Some(protocol));
                }
                Ok(Probe::Redirect(leader)) => leader,
                Ok(Probe::Unknown) => {
                    warn!(attempt, address, "no known leader");
                    continue;
                }
                Ok(Probe::BadProtocol) => {
                    warn!(attempt, address, "server unavailable: protocol rejected");
                    continue;
                }
                Err(err) => {
                    warn!(attempt, address, error = %err, "server unavailable");
                    continue;
                }
            };

            debug!(attempt, address, leader = %leader, "connect to reported leader");
            let ctx = ctx.with_timeout(self.config.attempt_timeout);
            match self.connect_attempt_one(&ctx, &leader, version).await {
                Ok(Probe::Leader(protocol)) => {
                    debug!(attempt, address = %leader, version, "connected");
                    return Ok(Some(protocol));
                }
                Ok(_) => {
                    warn!(
                        attempt,
                        address,
                        leader = %leader,
                        "reported leader server is not the leader"
                    );
                }
                Err(err) => {
                    warn!(
                        attempt,
                        address,
                        leader = %leader,
                        error = %err,
                        "reported leader unavailable"
                    );
                }
            }
        }

        Ok(None)
    }

    /// Dials `address`, asks it for the leader and registers if it is the leader.
    async fn connect_attempt_one(
        &self,
        ctx: &Context,
        address: &str,
        version: u64,
    ) -> Result<Probe> {
        let dial_ctx = ctx.with_timeout(self.config.dial_timeout);
        let conn = dial_ctx
            .run((self.config.dial)(address.to_string()))
            .await
            .map_err(|source| Error::Dial {
                address: address.to_string(),
                source,
            })?;

        let mut protocol = handshake(ctx, conn, version).await?;

        let mut request = Message::new(16);
        let mut response = Message::new(512);
        encode_leader(&mut request);

        if let Err(err) = protocol.call(ctx, &request, &mut response).await {
            let _ = protocol.close().await;
            // Pre-1.0 servers drop the connection when they see version 1.
            if err.is_disconnect() {
                return Ok(Probe::BadProtocol);
            }
            return Err(err);
        }

        let leader = match decode_node_compat(version, &mut response) {
            Ok((_, leader)) => leader,
            Err(err) => {
                let _ = protocol.close().await;
                return Err(err);
            }
        };

        if leader.is_empty() {
            let _ = protocol.close().await;
            return Ok(Probe::Unknown);
        }
        if leader != address {
            let _ = protocol.close().await;
            return Ok(Probe::Redirect(leader));
        }

        request.reset();
        response.reset();
        encode_client(&mut request, self.id);

        let welcome = match protocol.call(ctx, &request, &mut response).await {
            Ok(()) => decode_welcome(&mut response),
            Err(err) => Err(err),
        };
        match welcome {
            Ok(heartbeat_timeout) => {
                protocol.set_heartbeat_timeout(heartbeat_timeout);
                Ok(Probe::Leader(protocol))
            }
            Err(err) => {
                let _ = protocol.close().await;
                Err(err)
            }
        }
    }
}
