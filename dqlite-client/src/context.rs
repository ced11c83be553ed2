//! Deadlines and cancellation for client calls.
//!
//! Every blocking step (dialing, the handshake write, a request/response
//! exchange, the sleep between discovery passes) takes a [`Context`]. A context
//! carries an optional deadline and zero or more cancellation signals inherited
//! from its parents. Children can only shorten the deadline, never extend it.
//!
//! Cancellation is built on `tokio::sync::watch`: a [`CancelHandle`] owns the
//! sender, every derived context keeps a receiver.

use std::future::Future;
use std::io;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Error;

/// Deadline plus cancellation state passed into every I/O operation.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancels: Vec<watch::Receiver<bool>>,
}

/// Cancels the context returned alongside it by [`Context::with_cancel`].
///
/// Dropping the handle without calling [`CancelHandle::cancel`] leaves the
/// context running.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context with no deadline that is never canceled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context that expires after `timeout`, or earlier if the parent does.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derives a context that expires at `deadline`, or earlier if the parent does.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancels: self.cancels.clone(),
        }
    }

    /// Derives a context that is canceled by the returned handle or by any parent.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut cancels = self.cancels.clone();
        cancels.push(rx);
        let ctx = Self {
            deadline: self.deadline,
            cancels,
        };
        (ctx, CancelHandle { tx })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why the context is done, or `None` while it is still live.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<Error> {
        if self.cancels.iter().any(|rx| *rx.borrow()) {
            return Some(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) {
        tokio::select! {
            _ = self.canceled() => {}
            _ = self.expired() => {}
        }
    }

    /// Drives `fut` to completion unless the context ends first.
    ///
    /// Expiry surfaces as `TimedOut` and cancellation as `Interrupted`, so
    /// transport code can treat both like any other I/O failure.
    pub async fn run<F, T>(&self, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(into_io_error(err));
        }

        tokio::select! {
            result = fut => result,
            _ = self.canceled() => Err(into_io_error(Error::Canceled)),
            _ = self.expired() => Err(into_io_error(Error::DeadlineExceeded)),
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn canceled(&self) {
        if self.cancels.is_empty() {
            return std::future::pending().await;
        }

        let waits = self.cancels.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                // A dropped handle can no longer cancel anything.
                if rx.wait_for(|canceled| *canceled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }
}

fn into_io_error(err: Error) -> io::Error {
    match err {
        Error::Canceled => io::Error::new(io::ErrorKind::Interrupted, "context canceled"),
        other => io::Error::new(io::ErrorKind::TimedOut, other.to_string()),
    }
}
