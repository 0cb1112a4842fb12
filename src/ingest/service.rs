use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};

use crate::error::IngestError;
use crate::ids::{IdGenerator, JobId};
use crate::job::{Credentials, Job, SubmitReply, SubmitRequest};
use crate::job_manager::JobManager;
use crate::sign::SignatureVerifier;
use crate::store::KvStore;
use crate::validator::{Validate, Verdict};

use super::admission::admit;
use super::batch::Batch;
use super::pipeline::{self, FlushOutcome};

const REQUEST_QUEUE_DEPTH: usize = 256;
const SHUTTING_DOWN: &str = "job-ingest is shutting down";
const NOT_RUNNING: &str = "job-ingest is not running";

pub enum IngestRequest {
    Submit {
        request: SubmitRequest,
        credentials: Credentials,
        reply: SubmitReply,
    },
    GetInfo {
        reply: oneshot::Sender<Result<u64, IngestError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<usize, IngestError>>,
    },
}

/// Cloneable client side of an [`IngestService`].
#[derive(Clone, Debug)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestRequest>,
}

impl IngestHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, IngestError>>) -> IngestRequest,
    ) -> Result<T, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| IngestError::Unavailable(NOT_RUNNING.to_string()))?;
        rx.await
            .unwrap_or_else(|_| Err(IngestError::Unavailable(NOT_RUNNING.to_string())))
    }

    /// Submit a job and wait for its terminal response.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        credentials: Credentials,
    ) -> Result<JobId, IngestError> {
        self.call(|reply| IngestRequest::Submit {
            request,
            credentials,
            reply,
        })
        .await
    }

    /// High-water timestamp: no id issued here will ever fall below it.
    pub async fn get_info(&self) -> Result<u64, IngestError> {
        self.call(|reply| IngestRequest::GetInfo { reply }).await
    }

    /// Begin draining. Returns the number of validator workers still active.
    pub async fn shutdown(&self) -> Result<usize, IngestError> {
        self.call(|reply| IngestRequest::Shutdown { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Collaborators and tunables for one ingest service.
pub struct IngestParts {
    pub generator: IdGenerator,
    pub store: Arc<dyn KvStore>,
    pub job_manager: Arc<dyn JobManager>,
    pub validator: Arc<dyn Validate>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub batch_timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    /// Validators are draining; new submissions are refused.
    Draining,
    /// Validators drained; remaining work is flushed, then the loop exits.
    /// Once the shutdown timeout has expired the loop exits without waiting.
    Stopping,
}

type Validation = BoxFuture<'static, (u64, Verdict)>;

/// Event loop owning the generator, the open batch and every in-flight job.
///
/// All state changes happen on the task running [`IngestService::run`]; the
/// asynchronous stages (validation, commit and announce) are futures polled
/// from the same loop.
pub struct IngestService {
    generator: IdGenerator,
    store: Arc<dyn KvStore>,
    job_manager: Arc<dyn JobManager>,
    validator: Arc<dyn Validate>,
    verifier: Arc<dyn SignatureVerifier>,
    batch_timeout: Duration,
    shutdown_timeout: Duration,

    rx: mpsc::Receiver<IngestRequest>,
    rx_open: bool,
    state: State,

    /// Jobs waiting on their validator, keyed by validation sequence.
    validating: HashMap<u64, Job>,
    next_seq: u64,
    validations: FuturesUnordered<Validation>,

    batch: Option<Batch>,
    batch_timer: Pin<Box<Sleep>>,
    flushes: FuturesUnordered<BoxFuture<'static, FlushOutcome>>,

    drain: BoxFuture<'static, ()>,
    draining: bool,
    shutdown_timer: Pin<Box<Sleep>>,
    shutdown_armed: bool,
    shutdown_expired: bool,
}

impl IngestService {
    pub fn new(parts: IngestParts) -> (Self, IngestHandle) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let service = Self {
            generator: parts.generator,
            store: parts.store,
            job_manager: parts.job_manager,
            validator: parts.validator,
            verifier: parts.verifier,
            batch_timeout: parts.batch_timeout,
            shutdown_timeout: parts.shutdown_timeout,
            rx,
            rx_open: true,
            state: State::Running,
            validating: HashMap::new(),
            next_seq: 0,
            validations: FuturesUnordered::new(),
            batch: None,
            batch_timer: Box::pin(tokio::time::sleep(Duration::ZERO)),
            flushes: FuturesUnordered::new(),
            drain: future::pending().boxed(),
            draining: false,
            shutdown_timer: Box::pin(tokio::time::sleep(Duration::ZERO)),
            shutdown_armed: false,
            shutdown_expired: false,
        };
        (service, IngestHandle { tx })
    }

    pub async fn run(mut self) {
        tracing::info!(
            generator_id = self.generator.generator_id(),
            batch_timeout_ms = self.batch_timeout.as_millis() as u64,
            "Job ingest running"
        );

        loop {
            if self.state == State::Stopping {
                if self.shutdown_expired {
                    break;
                }
                if self.validations.is_empty() {
                    self.flush_batch();
                }
                if self.validations.is_empty() && self.flushes.is_empty() {
                    break;
                }
            }

            tokio::select! {
                request = self.rx.recv(), if self.rx_open => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        self.rx_open = false;
                        if self.state == State::Running {
                            tracing::info!("All ingest handles dropped, draining");
                            self.begin_drain();
                        }
                    }
                },
                Some((seq, verdict)) = self.validations.next(), if !self.validations.is_empty() => {
                    self.on_validated(seq, verdict);
                }
                () = self.batch_timer.as_mut(), if self.batch.is_some() => {
                    self.flush_batch();
                }
                Some(outcome) = self.flushes.next(), if !self.flushes.is_empty() => {
                    tracing::debug!(?outcome, "Batch flush finished");
                }
                () = &mut self.drain, if self.draining => {
                    self.draining = false;
                    tracing::debug!("Validators drained");
                    self.state = State::Stopping;
                }
                () = self.shutdown_timer.as_mut(), if self.shutdown_armed => {
                    self.on_shutdown_timeout();
                }
                else => break,
            }
        }

        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            self.handle_request(request);
        }
        self.abandon_validations();
        self.abandon_batches();
        tracing::info!("Job ingest stopped");
    }

    /// Only submissions are refused once shutdown has begun.
    fn handle_request(&mut self, request: IngestRequest) {
        match request {
            IngestRequest::Submit { reply, .. } if self.state != State::Running => {
                let _ = reply.send(Err(IngestError::NotSupported));
            }
            IngestRequest::Submit {
                request,
                credentials,
                reply,
            } => self.on_submit(request, credentials, reply),
            IngestRequest::GetInfo { reply } => {
                let _ = reply.send(Ok(self.generator.high_water_timestamp()));
            }
            IngestRequest::Shutdown { reply } => {
                let active = match self.state {
                    State::Running => self.begin_drain(),
                    State::Draining | State::Stopping => self.validator.active(),
                };
                let _ = reply.send(Ok(active));
            }
        }
    }

    fn on_submit(&mut self, request: SubmitRequest, credentials: Credentials, reply: SubmitReply) {
        let admission = match admit(&request, &credentials, self.verifier.as_ref()) {
            Ok(admission) => admission,
            Err(e) => {
                tracing::debug!(userid = credentials.userid, error = %e, "Submit rejected");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let verdict = self.validator.validate(admission.jobspec.clone());
        self.validations
            .push(async move { (seq, verdict.await) }.boxed());
        self.validating.insert(
            seq,
            Job::new(
                request.signed_spec,
                credentials,
                admission.priority,
                admission.flags,
                admission.jobspec,
                reply,
            ),
        );
    }

    fn on_validated(&mut self, seq: u64, verdict: Verdict) {
        let Some(job) = self.validating.remove(&seq) else {
            return;
        };
        if let Err(reason) = verdict {
            job.respond(Err(IngestError::Validation(reason)));
            return;
        }
        let id = match self.generator.allocate() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Job id allocation failed");
                job.respond(Err(e.into()));
                return;
            }
        };

        let opened = self.batch.is_none();
        let batch = self.batch.get_or_insert_with(Batch::new);
        if let Err((job, e)) = batch.add_job(id, job) {
            job.respond(Err(e));
            if batch.is_empty() {
                self.batch = None;
            }
            return;
        }
        if opened {
            // The window is fixed by the first job; later jobs do not extend it.
            self.batch_timer
                .as_mut()
                .reset(Instant::now() + self.batch_timeout);
        }
    }

    /// Detach the open batch and start its commit pipeline.
    fn flush_batch(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        tracing::debug!(jobs = batch.len(), "Batch window closed");
        self.flushes.push(
            pipeline::flush(batch, self.store.clone(), self.job_manager.clone()).boxed(),
        );
    }

    fn begin_drain(&mut self) -> usize {
        let drain = self.validator.request_drain();
        tracing::info!(active_validators = drain.active, "Shutting down job ingest");
        self.state = State::Draining;
        self.drain = drain.all_exited;
        self.draining = true;
        self.shutdown_timer
            .as_mut()
            .reset(Instant::now() + self.shutdown_timeout);
        self.shutdown_armed = true;
        drain.active
    }

    fn on_shutdown_timeout(&mut self) {
        self.shutdown_armed = false;
        self.shutdown_expired = true;
        if self.state == State::Draining {
            tracing::error!(
                active_validators = self.validator.active(),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Timed out waiting for validators to exit"
            );
            self.draining = false;
            self.state = State::Stopping;
        }
        self.abandon_validations();
    }

    /// Answer every job still waiting on a validator.
    fn abandon_validations(&mut self) {
        self.validations.clear();
        for (_, job) in self.validating.drain() {
            job.respond(Err(IngestError::Validation(SHUTTING_DOWN.to_string())));
        }
    }

    /// Give up on the open batch and on flushes still in flight. Dropping a
    /// flush drops its reply senders, so those submitters see `Unavailable`.
    fn abandon_batches(&mut self) {
        if let Some(batch) = self.batch.take() {
            let (jobs, _, _) = batch.into_parts();
            for job in jobs {
                job.respond(Err(IngestError::Unavailable(SHUTTING_DOWN.to_string())));
            }
        }
        if !self.flushes.is_empty() {
            tracing::error!(
                flushes = self.flushes.len(),
                "Abandoning batch flushes still in flight at shutdown"
            );
            self.flushes.clear();
        }
    }
}
