//! Background writes of the session to its store.
//!
//! The coordinator captures a [`SessionWrite`] while it holds its lock and
//! hands it over here once the lock is released. Writes are applied one at
//! a time on the blocking pool, and a write older than the last one applied
//! is skipped, so the store always ends up holding the latest committed
//! state no matter which order the submissions arrive in.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::session::{PersistedSession, SessionStore};

/// One committed state, numbered in commit order.
#[derive(Debug, Clone)]
pub(crate) struct SessionWrite {
    pub seq: u64,
    /// `None` clears the store.
    pub record: Option<PersistedSession>,
}

enum Job {
    Write(SessionWrite),
    Flush(oneshot::Sender<()>),
}

struct Applier {
    store: Arc<dyn SessionStore>,
    last_applied: Mutex<u64>,
}

impl Applier {
    fn apply(&self, write: SessionWrite) {
        let mut last = self.last_applied.lock();
        if write.seq <= *last {
            debug!(seq = write.seq, last = *last, "Skipping superseded session write");
            return;
        }
        *last = write.seq;

        let result = match write.record {
            Some(ref record) => self.store.save(record),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            warn!(seq = write.seq, error = %e, "Failed to persist session");
        }
    }
}

pub(crate) struct SessionWriter {
    applier: Arc<Applier>,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl SessionWriter {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            applier: Arc::new(Applier {
                store,
                last_applied: Mutex::new(0),
            }),
            tx: Mutex::new(None),
        }
    }

    /// Queue `write` for the background writer. Outside a runtime the write
    /// is applied on the calling thread.
    pub fn submit(&self, write: SessionWrite) {
        let write = match self.sender() {
            Some(tx) => match tx.send(Job::Write(write)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => match job {
                    Job::Write(write) => write,
                    Job::Flush(_) => return,
                },
            },
            None => write,
        };
        self.applier.apply(write);
    }

    /// Wait until every write submitted so far has been applied.
    pub async fn flush(&self) {
        let Some(tx) = self.tx.lock().clone() else {
            return;
        };
        let (done, applied) = oneshot::channel();
        if tx.send(Job::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Job>> {
        let mut slot = self.tx.lock();
        if let Some(tx) = slot.as_ref().filter(|tx| !tx.is_closed()) {
            return Some(tx.clone());
        }

        let handle = Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run(Arc::clone(&self.applier), rx));
        *slot = Some(tx.clone());
        Some(tx)
    }
}

async fn run(applier: Arc<Applier>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Write(write) => {
                let applier = Arc::clone(&applier);
                if let Err(e) = tokio::task::spawn_blocking(move || applier.apply(write)).await {
                    error!(error = %e, "Session write task failed");
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Session writer stopped");
}
