//! Scripted fake dqlite server shared by the integration tests.
//!
//! Each server listens on `127.0.0.1:0` and answers Leader and Client
//! requests according to its [`Behavior`]. Every other request is passed to
//! an optional [`Handler`] that decides what to send back.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use dqlite_client::dial::{dial, dial_func, DialFunc};
use dqlite_client::protocol::constants::ROWS_DONE;
use dqlite_client::protocol::{
    read_message, write_message, Message, RequestType, ResponseType, VERSION_LEGACY, VERSION_ONE,
};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub use dqlite_client::protocol::constants::ROWS_PART;

pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// How a fake server answers a Leader request.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Names itself as leader and welcomes clients.
    Leader,
    /// Names another address as leader.
    Redirect(String),
    /// Knows no leader.
    Unknown,
    /// Hangs up on version 1; as a legacy server it names itself leader.
    LegacyOnly,
}

/// What the server does after a request reaches the handler.
pub enum Reply {
    Send(Vec<Message>),
    Hangup,
}

pub type Handler = Arc<dyn Fn(RequestType, &mut Message) -> Reply + Send + Sync>;

/// A listener reserved before its behavior is chosen, so servers can
/// redirect to each other.
pub struct FakeServer {
    listener: TcpListener,
    pub address: String,
}

/// A server accepting connections in the background.
pub struct RunningServer {
    pub address: String,
    requests: Arc<Mutex<Vec<RequestType>>>,
    task: JoinHandle<()>,
}

impl RunningServer {
    /// Request types received so far, across all connections.
    pub fn requests(&self) -> Vec<RequestType> {
        self.requests.lock().clone()
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeServer {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        Ok(Self { listener, address })
    }

    pub fn start(self, behavior: Behavior) -> RunningServer {
        self.start_with(behavior, None)
    }

    pub fn start_with(self, behavior: Behavior, handler: Option<Handler>) -> RunningServer {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let address = self.address.clone();
        let listener = self.listener;

        let task = {
            let requests = requests.clone();
            let address = address.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let behavior = behavior.clone();
                    let handler = handler.clone();
                    let requests = requests.clone();
                    let address = address.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, &address, behavior, handler, requests).await;
                    });
                }
            })
        };

        RunningServer {
            address,
            requests,
            task,
        }
    }
}

/// Starts a plain leader that routes everything else to `handler`.
pub async fn leader_with(handler: Handler) -> Result<RunningServer> {
    Ok(FakeServer::bind()
        .await?
        .start_with(Behavior::Leader, Some(handler)))
}

async fn serve(
    mut socket: TcpStream,
    address: &str,
    behavior: Behavior,
    handler: Option<Handler>,
    requests: Arc<Mutex<Vec<RequestType>>>,
) -> Result<()> {
    let version = socket.read_u64_le().await?;
    if version == VERSION_ONE && matches!(behavior, Behavior::LegacyOnly) {
        return Ok(());
    }

    let mut request = Message::new(64);
    loop {
        read_message(&mut socket, &mut request).await?;
        let Some(ty) = RequestType::from_u8(request.mtype()) else {
            return Ok(());
        };
        requests.lock().push(ty);

        let replies = match ty {
            RequestType::Leader => {
                let leader = match &behavior {
                    Behavior::Leader | Behavior::LegacyOnly => address.to_string(),
                    Behavior::Redirect(other) => other.clone(),
                    Behavior::Unknown => String::new(),
                };
                if version == VERSION_LEGACY {
                    vec![response(ResponseType::Node, |m| m.put_string(&leader))]
                } else {
                    vec![node(1, &leader)]
                }
            }
            RequestType::Client => vec![welcome(15_000)],
            _ => match &handler {
                Some(handler) => match handler(ty, &mut request) {
                    Reply::Send(messages) => messages,
                    Reply::Hangup => return Ok(()),
                },
                None => return Ok(()),
            },
        };

        for reply in &replies {
            write_message(&mut socket, reply).await?;
        }
    }
}

/// Builds a sealed response message.
pub fn response(ty: ResponseType, build: impl FnOnce(&mut Message)) -> Message {
    let mut message = Message::new(64);
    build(&mut message);
    message.put_header(ty);
    message
}

pub fn node(id: u64, address: &str) -> Message {
    response(ResponseType::Node, |m| {
        m.put_u64(id);
        m.put_string(address);
    })
}

pub fn welcome(heartbeat_ms: u64) -> Message {
    response(ResponseType::Welcome, |m| m.put_u64(heartbeat_ms))
}

pub fn empty() -> Message {
    response(ResponseType::Empty, |m| m.put_u64(0))
}

pub fn failure(code: u64, description: &str) -> Message {
    response(ResponseType::Failure, |m| {
        m.put_u64(code);
        m.put_string(description);
    })
}

/// A single-column INTEGER result set ending in `marker`.
pub fn int_rows(column: &str, values: &[i64], marker: u8) -> Message {
    response(ResponseType::Rows, |m| {
        m.put_u64(1);
        m.put_string(column);
        for value in values {
            m.put_u64(1);
            m.put_i64(*value);
        }
        m.put_u64(u64::from_le_bytes([marker; 8]));
    })
}

pub fn done_rows(column: &str, values: &[i64]) -> Message {
    int_rows(column, values, ROWS_DONE)
}

/// A dialer that remembers every address it was asked to connect to.
pub fn recording_dialer() -> (DialFunc, Arc<Mutex<Vec<String>>>) {
    let dialed = Arc::new(Mutex::new(Vec::new()));
    let log = dialed.clone();
    let dialer = dial_func(move |address: String| {
        log.lock().push(address.clone());
        async move { dial(&address).await }
    });
    (dialer, dialed)
}

/// An address nothing listens on.
pub async fn dead_address() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    drop(listener);
    Ok(address)
}
