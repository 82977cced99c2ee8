//! Single-flight credential refresh.
//!
//! The `RefreshCoordinator` owns the process-wide [`SessionState`] and is
//! the only component that mutates it. Every transition happens inside one
//! short synchronous critical section that is never held across an await.
//!
//! When a request comes back 401 the gateway calls
//! [`RefreshCoordinator::ensure_valid_credential`]. The first caller to see
//! an expired credential moves the session to `Refreshing` and spawns the
//! refresh; every caller, first one included, is queued as a waiter holding
//! a oneshot receiver. When the refresh resolves, the phase transition and
//! the drain of the whole waiter queue happen under the same lock, so every
//! waiter observes the same outcome.
//!
//! Persistence happens outside the lock: each transition captures a
//! numbered [`SessionWrite`] while locked and hands it to the background
//! [`SessionWriter`] afterwards.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::error::{RefreshError, SessionError};
use super::observer::SessionObserver;
use super::refresher::{CredentialRefresher, RefreshedCredentials};
use super::session::{PersistedSession, SessionStore};
use super::state::{
    AccessToken, FailureKind, Identity, Phase, RefreshToken, SessionEvent, SessionSnapshot,
    SessionState,
};
use super::writer::{SessionWrite, SessionWriter};

/// Default upper bound on a single refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// What the gateway knows about the request that came back 401.
#[derive(Debug, Clone, Default)]
pub struct FailedRequest {
    /// The access token the request was sent with, if any.
    pub credential: Option<AccessToken>,
}

impl FailedRequest {
    pub fn new(credential: Option<AccessToken>) -> Self {
        Self { credential }
    }
}

/// Outcome broadcast to every waiter of one refresh.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Retry(AccessToken),
    Expired,
    Transient(String),
    LoggedOut,
}

impl RefreshOutcome {
    fn into_result(self) -> Result<AccessToken, SessionError> {
        match self {
            RefreshOutcome::Retry(token) => Ok(token),
            RefreshOutcome::Expired => Err(SessionError::SessionExpired),
            RefreshOutcome::Transient(reason) => Err(SessionError::RefreshTransientFailure(reason)),
            RefreshOutcome::LoggedOut => Err(SessionError::Unauthenticated),
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<RefreshOutcome>,
}

struct InFlightRefresh {
    id: u64,
    started_at: DateTime<Utc>,
    task: AbortHandle,
}

struct Core {
    state: SessionState,
    waiters: VecDeque<Waiter>,
    in_flight: Option<InFlightRefresh>,
    next_waiter_id: u64,
    next_refresh_id: u64,
    next_write_seq: u64,
}

impl Core {
    fn enqueue(&mut self) -> (u64, oneshot::Receiver<RefreshOutcome>) {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, tx });
        (id, rx)
    }

    /// Capture the committed state for the session store.
    fn capture(&mut self) -> SessionWrite {
        self.next_write_seq += 1;
        let record = if self.state.phase() == Phase::Anonymous {
            None
        } else {
            Some(PersistedSession::from_state(&self.state))
        };
        SessionWrite {
            seq: self.next_write_seq,
            record,
        }
    }

    /// Resume every waiter with the same outcome, in enqueue order.
    fn drain(&mut self, outcome: &RefreshOutcome) -> usize {
        let waiters = std::mem::take(&mut self.waiters);
        let count = waiters.len();
        for waiter in waiters {
            // A dropped receiver is a cancelled caller that lost the race
            // with the drain; nothing to do.
            let _ = waiter.tx.send(outcome.clone());
        }
        count
    }
}

struct Shared {
    core: Mutex<Core>,
    refresher: Arc<dyn CredentialRefresher>,
    store: Arc<dyn SessionStore>,
    writer: SessionWriter,
    observer: SessionObserver,
    refresh_timeout: Duration,
}

impl Shared {
    fn complete(&self, refresh_id: u64, result: Result<RefreshedCredentials, RefreshError>) {
        let mut core = self.core.lock();

        match core.in_flight {
            Some(ref in_flight) if in_flight.id == refresh_id => {
                let elapsed_ms = (Utc::now() - in_flight.started_at).num_milliseconds();
                debug!(refresh_id, elapsed_ms, "Refresh resolved");
            }
            _ => {
                // Superseded by an explicit logout while in flight
                debug!(refresh_id, "Discarding result of abandoned refresh");
                return;
            }
        }
        core.in_flight = None;

        let (event, outcome) = match result {
            Ok(credentials) => {
                let outcome = RefreshOutcome::Retry(credentials.access_token.clone());
                let event = SessionEvent::RefreshSucceeded {
                    access: credentials.access_token,
                    refresh: credentials.refresh_token,
                };
                (event, outcome)
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Refresh failed transiently, keeping session");
                (
                    SessionEvent::RefreshFailed(FailureKind::Recoverable),
                    RefreshOutcome::Transient(e.to_string()),
                )
            }
            Err(e) => {
                info!(error = %e, "Refresh rejected, ending session");
                (
                    SessionEvent::RefreshFailed(FailureKind::Unrecoverable),
                    RefreshOutcome::Expired,
                )
            }
        };

        if let Err(e) = core.state.transition(event) {
            // Unreachable while `in_flight` tracks the phase; fail closed.
            error!(error = %e, "Refresh completion rejected by session state");
            let _ = core.state.transition(SessionEvent::LoggedOut);
        }

        let write = match outcome {
            RefreshOutcome::Transient(_) => None,
            _ => Some(core.capture()),
        };

        let resumed = core.drain(&outcome);
        let logged_out = core.state.phase() == Phase::Anonymous;
        drop(core);

        if let Some(write) = write {
            self.writer.submit(write);
        }
        debug!(resumed, ?outcome, "Waiters resumed");
        if logged_out {
            self.observer.notify_logout();
        }
    }

    fn remove_waiter(&self, waiter_id: u64) {
        let mut core = self.core.lock();
        let before = core.waiters.len();
        core.waiters.retain(|w| w.id != waiter_id);
        if core.waiters.len() != before {
            debug!(waiter_id, remaining = core.waiters.len(), "Cancelled waiter removed");
        }
    }
}

/// A caller queued behind an in-flight refresh.
///
/// Dropping it before it resolves removes the caller from the queue
/// without disturbing the refresh or the other waiters.
struct PendingRefresh {
    id: u64,
    rx: oneshot::Receiver<RefreshOutcome>,
    shared: Arc<Shared>,
    resolved: bool,
}

impl PendingRefresh {
    async fn wait(mut self) -> Result<AccessToken, SessionError> {
        let outcome = (&mut self.rx).await;
        self.resolved = true;
        match outcome {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(SessionError::RefreshTransientFailure(
                "refresh was abandoned".to_string(),
            )),
        }
    }
}

impl Drop for PendingRefresh {
    fn drop(&mut self) {
        if !self.resolved {
            self.shared.remove_waiter(self.id);
        }
    }
}

enum Admission {
    Ready(AccessToken),
    Wait(PendingRefresh),
    Refused(SessionError),
}

/// Owner of the session and gate for credential refreshes.
/// Clone is cheap - clones share the same session.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn CredentialRefresher>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_observer(refresher, store, SessionObserver::new())
    }

    pub fn with_observer(
        refresher: Arc<dyn CredentialRefresher>,
        store: Arc<dyn SessionStore>,
        observer: SessionObserver,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    state: SessionState::new(),
                    waiters: VecDeque::new(),
                    in_flight: None,
                    next_waiter_id: 0,
                    next_refresh_id: 0,
                    next_write_seq: 0,
                }),
                refresher,
                writer: SessionWriter::new(Arc::clone(&store)),
                store,
                observer,
                refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            }),
        }
    }

    /// Set the refresh timeout. Must be called before the coordinator is cloned.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.refresh_timeout = timeout,
            None => warn!("Refresh timeout ignored: coordinator already shared"),
        }
        self
    }

    pub fn observer(&self) -> &SessionObserver {
        &self.shared.observer
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.core.lock().state.snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.shared.core.lock().state.phase()
    }

    /// The access token to attach to a request dispatched now.
    pub fn current_credential(&self) -> Option<AccessToken> {
        self.shared.core.lock().state.access_token().cloned()
    }

    /// Number of callers queued behind the in-flight refresh.
    pub fn pending_waiters(&self) -> usize {
        self.shared.core.lock().waiters.len()
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.core.lock().in_flight.is_some()
    }

    /// Wait until every committed transition has reached the session store.
    pub async fn flush(&self) {
        self.shared.writer.flush().await;
    }

    /// Rehydrate from the session store. Returns whether a session was restored.
    ///
    /// Only valid at startup, while the session is still anonymous.
    pub fn restore(&self) -> anyhow::Result<bool> {
        let persisted = match self.shared.store.load()? {
            Some(persisted) if persisted.is_usable() => persisted,
            Some(_) => {
                debug!("Stored session is not authenticated");
                return Ok(false);
            }
            None => return Ok(false),
        };

        let (Some(access), Some(identity)) = (persisted.access_token, persisted.identity) else {
            return Ok(false);
        };

        let mut core = self.shared.core.lock();
        if core.state.phase() != Phase::Anonymous {
            warn!(phase = %core.state.phase(), "Session already active, not restoring");
            return Ok(false);
        }
        core.state.transition(SessionEvent::LoginSucceeded {
            access,
            refresh: persisted.refresh_token,
            identity,
        })?;
        info!(
            can_refresh = core.state.refresh_token().is_some(),
            "Session restored"
        );
        Ok(true)
    }

    /// Commit a successful login.
    pub fn login(
        &self,
        access: AccessToken,
        refresh: Option<RefreshToken>,
        identity: Identity,
    ) -> Result<(), SessionError> {
        let mut core = self.shared.core.lock();
        core.state.transition(SessionEvent::LoginSucceeded {
            access,
            refresh,
            identity,
        })?;
        let write = core.capture();
        drop(core);

        self.shared.writer.submit(write);
        info!("Login committed");
        Ok(())
    }

    /// End the session. Returns false if there was no session to end.
    ///
    /// An in-flight refresh is aborted and its waiters resume with
    /// `Unauthenticated`.
    pub fn logout(&self) -> bool {
        let mut core = self.shared.core.lock();
        if core.state.phase() == Phase::Anonymous {
            return false;
        }
        if let Some(in_flight) = core.in_flight.take() {
            in_flight.task.abort();
            debug!(refresh_id = in_flight.id, "In-flight refresh aborted");
        }
        // LoggedOut is valid from every phase
        let _ = core.state.transition(SessionEvent::LoggedOut);
        let write = core.capture();
        let resumed = core.drain(&RefreshOutcome::LoggedOut);
        drop(core);

        self.shared.writer.submit(write);

        info!(resumed, "Logged out");
        self.shared.observer.notify_logout();
        true
    }

    /// Make sure a usable credential exists after `failed` came back 401.
    ///
    /// Returns the access token to retry with. At most one refresh runs at a
    /// time; callers arriving while it runs wait for its outcome.
    pub async fn ensure_valid_credential(
        &self,
        failed: &FailedRequest,
    ) -> Result<AccessToken, SessionError> {
        match self.admit(failed) {
            Admission::Ready(token) => Ok(token),
            Admission::Refused(err) => Err(err),
            Admission::Wait(pending) => pending.wait().await,
        }
    }

    fn admit(&self, failed: &FailedRequest) -> Admission {
        let mut core = self.shared.core.lock();

        match core.state.phase() {
            Phase::Anonymous | Phase::Invalid => Admission::Refused(SessionError::Unauthenticated),
            Phase::Refreshing => {
                let (id, rx) = core.enqueue();
                debug!(waiter_id = id, queued = core.waiters.len(), "Waiting on in-flight refresh");
                Admission::Wait(self.pending(id, rx))
            }
            Phase::Authenticated => {
                let current = core.state.access_token().cloned();
                if let Some(current) = current {
                    if failed.credential.as_ref() != Some(&current) {
                        // A refresh committed after this request was sent
                        debug!("Request used a superseded credential, retrying with current one");
                        return Admission::Ready(current);
                    }
                }

                let Some(refresh_token) = core.state.refresh_token().cloned() else {
                    info!("Credential rejected and no refresh token held, logging out");
                    let _ = core.state.transition(SessionEvent::LoggedOut);
                    let write = core.capture();
                    drop(core);
                    self.shared.writer.submit(write);
                    self.shared.observer.notify_logout();
                    return Admission::Refused(SessionError::Unauthenticated);
                };

                if let Err(e) = core.state.transition(SessionEvent::RefreshStarted) {
                    return Admission::Refused(e.into());
                }
                let refresh_id = core.next_refresh_id;
                core.next_refresh_id += 1;
                // Spawned under the lock so a logout always finds the task to abort
                let task = self.spawn_refresh(refresh_id, refresh_token);
                core.in_flight = Some(InFlightRefresh {
                    id: refresh_id,
                    started_at: Utc::now(),
                    task,
                });
                let (id, rx) = core.enqueue();
                drop(core);

                info!(refresh_id, "Access token rejected, starting refresh");
                Admission::Wait(self.pending(id, rx))
            }
        }
    }

    fn pending(&self, id: u64, rx: oneshot::Receiver<RefreshOutcome>) -> PendingRefresh {
        PendingRefresh {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            resolved: false,
        }
    }

    /// Run the refresher on its own task so cancelling the caller that
    /// started it does not cancel it for everyone else.
    fn spawn_refresh(&self, refresh_id: u64, refresh_token: RefreshToken) -> AbortHandle {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let refresher = Arc::clone(&shared.refresher);
            let exchange = tokio::time::timeout(shared.refresh_timeout, refresher.refresh(&refresh_token));
            let result = match AssertUnwindSafe(exchange).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(_elapsed)) => {
                    warn!(refresh_id, timeout_ms = shared.refresh_timeout.as_millis() as u64, "Refresh timed out");
                    Err(RefreshError::NetworkFailure("refresh timed out".to_string()))
                }
                Err(_) => {
                    error!(refresh_id, "Credential refresher panicked");
                    Err(RefreshError::NetworkFailure("refresher panicked".to_string()))
                }
            };
            shared.complete(refresh_id, result);
        });
        task.abort_handle()
    }
}

// ============================================================================
// Tests
// ============================================================================
