//! Single-flight credential renewal.
//!
//! At most one renewal exchange runs at a time. Callers arriving while one is
//! in flight queue behind it and receive the same outcome, in the order they
//! arrived. The queue is drained exactly once per cycle, at the moment the
//! cycle concludes.

use crate::credentials::{now_millis, CredentialPair, CredentialStore};
use crate::error::{SessionError, SessionResult};
use crate::exchange::AuthExchange;
use crate::signals::SessionEndedNotifier;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};


/// Outcome delivered to every caller of one renewal cycle: the new access
/// credential, or the shared failure.
type Outcome = SessionResult<String>;

#[derive(Default)]
struct CycleState {
    in_flight: bool,
    /// Only non-empty while `in_flight` is set.
    waiters: Vec<oneshot::Sender<Outcome>>,
}

/// Coordinates renewal of the shared credential pair.
///
/// Constructed once per application session and shared by the dispatcher and
/// the session manager. It is the only writer of the credential store.
pub struct RenewalCoordinator {
    store: Arc<CredentialStore>,
    exchange: Arc<dyn AuthExchange>,
    notifier: Arc<dyn SessionEndedNotifier>,
    state: Mutex<CycleState>,
}

impl RenewalCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        exchange: Arc<dyn AuthExchange>,
        notifier: Arc<dyn SessionEndedNotifier>,
    ) -> Self {
        Self {
            store,
            exchange,
            notifier,
            state: Mutex::new(CycleState::default()),
        }
    }

    /// Renews the credential pair, or joins the renewal already in flight.
    ///
    /// Resolves with the access credential of the installed pair. A renewal
    /// credential refused by the remote end ends the session; every other
    /// failure leaves the (stale) session in place so the next request can try
    /// again.
    pub async fn renew(&self) -> Outcome {
        let queued = {
            let mut state = self.lock_state();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                debug!(position = state.waiters.len(), "Renewal in flight, queueing");
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(rx) = queued {
            return rx.await.unwrap_or(Err(SessionError::RenewalAbandoned));
        }

        let mut cycle = Cycle {
            coordinator: self,
            finished: false,
        };
        let outcome = self.exchange_once().await;
        cycle.finish(&outcome);
        outcome
    }

    /// True while a renewal exchange is running.
    pub fn is_renewing(&self) -> bool {
        self.lock_state().in_flight
    }

    /// Installs a pair obtained from a login exchange.
    pub fn install(&self, pair: &CredentialPair) -> SessionResult<()> {
        self.store.save(pair)
    }

    /// Clears the session without notifying. Used for voluntary logout.
    ///
    /// A renewal in flight will find the session gone and discard its result.
    pub fn clear(&self) -> bool {
        self.store.clear()
    }

    /// Ends the session involuntarily.
    ///
    /// Notifies only if a session was still active, so concurrent observers of
    /// the same failure produce a single notification.
    pub fn end_session(&self) {
        if self.store.clear() {
            warn!("Session ended, credentials cleared");
            self.notifier.on_session_ended();
        } else {
            debug!("Session already ended");
        }
    }

    async fn exchange_once(&self) -> Outcome {
        let generation = self.store.generation();
        let renewal_credential = self
            .store
            .renewal_credential()
            .ok_or(SessionError::NotAuthenticated)?;

        info!("Renewing session credentials");

        match self.exchange.renew(&renewal_credential).await {
            Ok(grant) => {
                let pair = CredentialPair::issue(grant, now_millis()).map_err(|e| {
                    warn!(error = %e, "Renewal returned an unusable grant, keeping current session");
                    e
                })?;
                if !self.store.save_if_generation(generation, &pair)? {
                    info!("Session changed during renewal, discarding renewed credentials");
                    return Err(SessionError::SessionEnded);
                }
                info!(expires_at = pair.expires_at, "Session credentials renewed");
                Ok(pair.access_token)
            }
            Err(SessionError::RenewalCredentialInvalid) => {
                warn!("Renewal credential rejected by the API");
                if self.store.clear_if_generation(generation) {
                    warn!("Session ended, credentials cleared");
                    self.notifier.on_session_ended();
                }
                Err(SessionError::RenewalCredentialInvalid)
            }
            Err(err) => {
                warn!(error = %err, "Credential renewal failed, keeping current session");
                Err(err)
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.lock_state().waiters.len()
    }
}

/// The leader's hold on a renewal cycle.
///
/// If the leader is dropped mid-exchange the cycle is released anyway: the
/// in-flight flag is reset and queued callers observe `RenewalAbandoned`.
struct Cycle<'a> {
    coordinator: &'a RenewalCoordinator,
    finished: bool,
}

impl Cycle<'_> {
    fn finish(&mut self, outcome: &Outcome) {
        let waiters = self.release();
        self.finished = true;

        for waiter in waiters {
            // A waiter that stopped listening is simply skipped
            let _ = waiter.send(outcome.clone());
        }
    }

    fn release(&self) -> Vec<oneshot::Sender<Outcome>> {
        let mut state = self.coordinator.lock_state();
        state.in_flight = false;
        std::mem::take(&mut state.waiters)
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let abandoned = self.release();
            warn!(waiters = abandoned.len(), "Renewal abandoned before completion");
        }
    }
}
