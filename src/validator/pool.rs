use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::{oneshot, watch};

use super::worker::{self, WorkItem, WorkerHandle};
use super::{Drain, Validate, Verdict};
use crate::config::ValidatorConfig;

#[derive(Default)]
struct PoolState {
    workers: Vec<WorkerHandle>,
    next_worker_id: usize,
    stopped: bool,
}

/// Pool of external validator processes.
///
/// Workers are started lazily, up to `max_workers`. Each request goes to
/// the least loaded worker; a new one is started only when every running
/// worker is busy.
pub struct ValidatorPool {
    program: PathBuf,
    args: Vec<String>,
    max_workers: usize,
    state: Mutex<PoolState>,
    active: Arc<watch::Sender<usize>>,
}

impl ValidatorPool {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, max_workers: usize) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            program: program.into(),
            args,
            max_workers: max_workers.max(1),
            state: Mutex::new(PoolState::default()),
            active: Arc::new(active),
        }
    }

    /// Returns `None` when the config names no validator program.
    pub fn from_config(config: &ValidatorConfig) -> Option<Self> {
        let program = config.path.clone()?;
        Some(Self::new(program, config.args.clone(), config.max_workers))
    }

    fn dispatch(&self, item: WorkItem) -> Result<(), String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| "validator pool lock poisoned".to_string())?;
        if state.stopped {
            return Err("validator is shutting down".to_string());
        }
        state.workers.retain(WorkerHandle::is_open);

        let least_loaded = state
            .workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.pending())
            .map(|(i, w)| (i, w.pending()));

        let index = match least_loaded {
            Some((i, 0)) => i,
            Some((i, _)) if state.workers.len() >= self.max_workers => i,
            _ => {
                let id = state.next_worker_id;
                state.next_worker_id += 1;
                match worker::start(id, &self.program, &self.args, self.active.clone()) {
                    Ok(handle) => {
                        state.workers.push(handle);
                        state.workers.len() - 1
                    }
                    Err(e) => {
                        tracing::warn!(
                            program = %self.program.display(),
                            error = %e,
                            running = state.workers.len(),
                            "Failed to start validator"
                        );
                        // Queue on a running worker instead.
                        match least_loaded {
                            Some((i, _)) => i,
                            None => return Err(format!("failed to start validator: {e}")),
                        }
                    }
                }
            }
        };

        let target = &state.workers[index];
        target.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc_err) = target.tx.send(item) {
            target.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(worker = target.id, "Validator queue closed");
            let _ = mpsc_err.0.reply.send(Err("validator exited".to_string()));
        }
        Ok(())
    }
}

impl Validate for ValidatorPool {
    fn validate(&self, jobspec: Bytes) -> BoxFuture<'static, Verdict> {
        let (reply, rx) = oneshot::channel();
        if let Err(reason) = self.dispatch(WorkItem { jobspec, reply }) {
            return future::ready(Err(reason)).boxed();
        }
        async move {
            rx.await
                .unwrap_or_else(|_| Err("validator exited unexpectedly".to_string()))
        }
        .boxed()
    }

    fn request_drain(&self) -> Drain {
        if let Ok(mut state) = self.state.lock() {
            state.stopped = true;
            // Dropping the handles closes each worker's queue.
            state.workers.clear();
        }

        let active = *self.active.borrow();
        let mut rx = self.active.subscribe();
        Drain {
            active,
            all_exited: async move {
                let _ = rx.wait_for(|n| *n == 0).await;
            }
            .boxed(),
        }
    }

    fn active(&self) -> usize {
        *self.active.borrow()
    }
}

impl std::fmt::Debug for ValidatorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorPool")
            .field("program", &self.program)
            .field("max_workers", &self.max_workers)
            .field("active", &*self.active.borrow())
            .finish()
    }
}
