//! Signals the session layer raises for the surrounding application.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Process-wide "API unreachable" indicator.
///
/// Set when a request gets no response, cleared by the next exchange that gets
/// any response. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct OutageSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl OutageSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_offline(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == offline {
                false
            } else {
                *current = offline;
                true
            }
        });

        if changed && offline {
            warn!("Connection to the API lost");
        } else if changed {
            info!("Connection to the API restored");
        }
    }
}

impl Default for OutageSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the notification that a session ended involuntarily.
///
/// Invoked exactly once per involuntary end, whatever the number of requests
/// that observed it. A voluntary logout does not notify.
pub trait SessionEndedNotifier: Send + Sync {
    fn on_session_ended(&self);
}

impl<F> SessionEndedNotifier for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_ended(&self) {
        self()
    }
}
