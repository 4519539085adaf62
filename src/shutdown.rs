//! # Cooperative Shutdown
//!
//! Termination signals only flip a `watch` flag. The gateway loop observes
//! the flag between cycles and drains; nothing else happens in response to
//! the signal itself.

use std::io;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sending half of the stop-requested flag
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create the flag, initially not requested
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Request a drain. Idempotent.
    pub fn request(&self) {
        self.tx.send_replace(true);
    }
}

/// Spawn a task that requests shutdown on SIGINT or SIGTERM
///
/// The handlers are installed before this returns, so a signal delivered
/// afterwards always reaches the flag instead of killing the process.
///
/// # Errors
///
/// Returns the registration error; `shutdown` is dropped in that case.
#[cfg(unix)]
pub fn listen_for_signals(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        shutdown.request();
    }))
}

#[cfg(not(unix))]
pub fn listen_for_signals(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.request();
        }
    }))
}

/// Resolve once shutdown has been requested
///
/// Also resolves if every `Shutdown` handle is dropped.
pub async fn requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
