//! Opening byte streams to dqlite servers.
//!
//! The connector never dials directly; it goes through a [`DialFunc`] so
//! callers can plug in TLS, proxies, or in-process transports for tests.

use std::future::Future;
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

/// A bidirectional stream to a dqlite server.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Conn for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens a connection to the given address.
pub type DialFunc =
    Arc<dyn Fn(String) -> BoxFuture<'static, io::Result<Box<dyn Conn>>> + Send + Sync>;

/// Wraps an async closure as a [`DialFunc`].
pub fn dial_func<F, Fut>(f: F) -> DialFunc
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<Box<dyn Conn>>> + Send + 'static,
{
    Arc::new(move |address| Box::pin(f(address)))
}

/// The dialer used when the caller does not supply one.
pub fn default_dial_func() -> DialFunc {
    dial_func(|address| async move { dial(&address).await })
}

/// Connects over TCP, or over a Unix socket when the address starts with `/`
/// (a filesystem path) or `@` (a Linux abstract socket).
pub async fn dial(address: &str) -> io::Result<Box<dyn Conn>> {
    if address.starts_with('/') {
        trace!(address, "dialing unix socket");
        return dial_path(address).await;
    }
    if let Some(name) = address.strip_prefix('@') {
        trace!(address, "dialing abstract unix socket");
        return dial_abstract(name);
    }

    trace!(address, "dialing tcp");
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

#[cfg(unix)]
async fn dial_path(path: &str) -> io::Result<Box<dyn Conn>> {
    Ok(Box::new(tokio::net::UnixStream::connect(path).await?))
}

#[cfg(not(unix))]
async fn dial_path(path: &str) -> io::Result<Box<dyn Conn>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unix socket {path} is only available on unix"),
    ))
}

#[cfg(target_os = "linux")]
fn dial_abstract(name: &str) -> io::Result<Box<dyn Conn>> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = UnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    Ok(Box::new(tokio::net::UnixStream::from_std(stream)?))
}

#[cfg(not(target_os = "linux"))]
fn dial_abstract(name: &str) -> io::Result<Box<dyn Conn>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("abstract unix socket @{name} is only available on linux"),
    ))
}
