//! Reclamation of native mirrors whose owners have died.
//!
//! Owners never free native memory themselves. When a vector or string
//! element is dropped its mirror is queued here and a dedicated worker thread
//! releases it. The worker is started on first use and runs until the owning
//! context shuts down; mirrors queued after shutdown are released inline on
//! the dropping thread.

use crate::mirror::NativeMirror;
use crate::registry::MirrorRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ReclaimStats {
    pending: AtomicU64,
    released: AtomicU64,
}

impl ReclaimStats {
    /// Mirrors queued but not yet released
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Mirrors released so far
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    fn finish(&self, released: bool) {
        if released {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct WorkerState {
    sender: Option<Sender<Arc<NativeMirror>>>,
    worker: Option<JoinHandle<()>>,
    worker_id: Option<ThreadId>,
    shut_down: bool,
}

pub struct Reclaimer {
    registry: Arc<MirrorRegistry>,
    name: String,
    state: Mutex<WorkerState>,
    stats: Arc<ReclaimStats>,
}

impl Reclaimer {
    pub fn new(registry: Arc<MirrorRegistry>, name: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            state: Mutex::new(WorkerState::default()),
            stats: Arc::new(ReclaimStats::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> &ReclaimStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.state().sender.is_some()
    }

    /// Start the worker unless it is running or the reclaimer was shut down.
    pub fn ensure_started(&self) {
        let mut state = self.state();
        self.start_locked(&mut state);
    }

    fn start_locked(&self, state: &mut WorkerState) {
        if state.sender.is_some() || state.shut_down {
            return;
        }
        let (sender, receiver) = mpsc::channel();
        let registry = self.registry.clone();
        let stats = self.stats.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_worker(receiver, registry, stats));
        match spawned {
            Ok(worker) => {
                tracing::info!(name = %self.name, "started reclamation worker");
                state.worker_id = Some(worker.thread().id());
                state.worker = Some(worker);
                state.sender = Some(sender);
            }
            Err(err) => {
                // without a worker every release happens on the dropping thread
                tracing::warn!(error = %err, "could not start reclamation worker");
            }
        }
    }

    /// Hand a mirror over for release. Never blocks on the release itself
    /// while the worker is running.
    pub fn enqueue(&self, mirror: Arc<NativeMirror>) {
        self.stats.pending.fetch_add(1, Ordering::AcqRel);
        let rejected = {
            let mut state = self.state();
            self.start_locked(&mut state);
            match &state.sender {
                Some(sender) => sender.send(mirror).err().map(|err| err.0),
                None => Some(mirror),
            }
        };
        if let Some(mirror) = rejected {
            let released = mirror.release(&self.registry);
            self.stats.finish(released);
        }
    }

    /// Wait until every queued mirror has been released. Returns false on
    /// timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.stats.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stop accepting work, drain the queue and join the worker.
    ///
    /// When called from the worker itself (the last context reference died
    /// during a release) the join is skipped; the worker exits on its own
    /// once the queue is drained.
    pub fn shutdown(&self) {
        let (sender, worker, worker_id) = {
            let mut state = self.state();
            state.shut_down = true;
            (state.sender.take(), state.worker.take(), state.worker_id.take())
        };
        drop(sender);
        let Some(worker) = worker else {
            return;
        };
        if worker_id == Some(thread::current().id()) {
            return;
        }
        if worker.join().is_err() {
            tracing::error!(name = %self.name, "reclamation worker panicked");
        }
        tracing::info!(
            name = %self.name,
            released = self.stats.released(),
            "reclamation worker stopped"
        );
    }
}

fn run_worker(
    receiver: Receiver<Arc<NativeMirror>>,
    registry: Arc<MirrorRegistry>,
    stats: Arc<ReclaimStats>,
) {
    while let Ok(mirror) = receiver.recv() {
        let handle = mirror.handle();
        let released = mirror.release(&registry);
        drop(mirror);
        stats.finish(released);
        tracing::trace!(%handle, pending = stats.pending(), "released native mirror");
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("name", &self.name)
            .field("pending", &self.stats.pending())
            .field("released", &self.stats.released())
            .finish()
    }
}
