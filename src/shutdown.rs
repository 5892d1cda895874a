//! Shutdown coordination
//!
//! A [`StopSignal`] is owned by the lifecycle and handed by reference to the
//! poll loop and the OS signal listener. Triggering it any number of times,
//! including after the poll loop has already returned, is a no-op past the
//! first call.

use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Single-use cancellation token
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Returns `true` only for the call that flipped the signal.
    pub fn trigger(&self) -> bool {
        // send_replace succeeds even when nobody is subscribed
        let was_stopped = self.tx.send_replace(true);
        if was_stopped {
            debug!("Stop already requested, ignoring repeated trigger");
        }
        !was_stopped
    }

    /// Completes once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// SIGINT/SIGTERM listener. Handlers are registered on install so a
/// registration failure surfaces at startup.
pub struct SignalListener {
    sig_int: Signal,
    sig_term: Signal,
}

impl SignalListener {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sig_int: signal(SignalKind::interrupt())?,
            sig_term: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the first INT or TERM, returning its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sig_int.recv() => "SIGINT",
            _ = self.sig_term.recv() => "SIGTERM",
        }
    }

    /// Trigger `stop` on the first shutdown signal
    pub fn spawn(mut self, stop: StopSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = self.recv().await;
            warn!(signal = name, "Signalled, stopping ...");
            stop.trigger();
        })
    }
}
