//! Analysis orchestrator
//!
//! Jobs are queued per group and executed by a fixed pool of worker tasks.
//! The job table, the pending queue and the fingerprint -> in-flight map sit
//! behind one lock that is never held across an await. A worker that picks up
//! a job whose fingerprint is already being generated parks it as a waiter on
//! that call instead of issuing a second one.

mod backoff;
mod cache;
mod rate_limit;

pub use backoff::RetryPolicy;
pub use cache::{AnalysisResult, ResultCache};
pub use rate_limit::RateLimiter;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use super::llm::{DocGenerator, FailureKind, GenerationError, GenerationRequest};
use backoff::{is_cancelled, sleep_unless_cancelled};

pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Succeeded,
    FailedPermanent,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::FailedPermanent)
    }
}

/// Scheduling record for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: JobId,
    pub group_id: String,
    pub repository: String,
    pub fingerprint: String,
    pub status: JobStatus,
    /// External calls made for this job
    pub attempts: u32,
    pub last_error: Option<FailureKind>,
    pub last_message: Option<String>,
    /// Failed because transient errors used up every attempt
    pub transient_exhausted: bool,
    pub from_cache: bool,
    /// Settled by another job's call for the same fingerprint
    pub coalesced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub jobs: Vec<AnalysisJob>,
    pub external_calls: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Deadline for one external call attempt
    pub call_timeout: Duration,
    pub requests_per_minute: Option<u32>,
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base: Duration::from_millis(config.base_backoff_ms),
                max: Duration::from_millis(config.max_backoff_ms),
            },
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            requests_per_minute: config.requests_per_minute,
        }
    }
}

#[derive(Debug, Clone)]
struct JobSignal {
    job: AnalysisJob,
    /// Terminal, or the run that owned the job has ended
    settled: bool,
}

/// Awaitable view of a submitted job
pub struct JobHandle {
    id: JobId,
    rx: watch::Receiver<JobSignal>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Latest published state, without waiting
    pub fn snapshot(&self) -> AnalysisJob {
        self.rx.borrow().job.clone()
    }

    /// Resolves when the job reaches a terminal state or the run ends
    /// with the job still pending.
    pub async fn wait(mut self) -> AnalysisJob {
        loop {
            {
                let signal = self.rx.borrow_and_update();
                if signal.settled {
                    return signal.job.clone();
                }
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().job.clone();
            }
        }
    }
}

struct InFlight {
    owner: JobId,
    waiters: Vec<JobId>,
}

#[derive(Default)]
struct QueueState {
    jobs: Vec<AnalysisJob>,
    requests: Vec<Arc<GenerationRequest>>,
    signals: Vec<watch::Sender<JobSignal>>,
    pending: VecDeque<JobId>,
    in_flight: HashMap<String, InFlight>,
    external_calls: usize,
}

impl QueueState {
    fn update<F: FnOnce(&mut AnalysisJob)>(&mut self, id: JobId, f: F) {
        if let Some(job) = self.jobs.get_mut(id) {
            f(job);
            let settled = job.status.is_terminal();
            let signal = JobSignal {
                job: job.clone(),
                settled,
            };
            self.signals[id].send_replace(signal);
        }
    }

    /// Release a fingerprint, returning the owner followed by its waiters
    fn release(&mut self, fingerprint: &str) -> Vec<JobId> {
        match self.in_flight.remove(fingerprint) {
            Some(entry) => std::iter::once(entry.owner).chain(entry.waiters).collect(),
            None => Vec::new(),
        }
    }
}

/// Owns the job queue, the in-flight map and the result cache
pub struct Orchestrator {
    state: Arc<Mutex<QueueState>>,
    generator: Arc<dyn DocGenerator>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimiter>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn DocGenerator>,
        cache: Arc<ResultCache>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            generator,
            limiter: Arc::new(RateLimiter::per_minute(settings.requests_per_minute)),
            cache,
            settings,
        }
    }

    /// Queue a job for `request`. A cached fingerprint succeeds immediately.
    pub fn submit(&self, request: GenerationRequest) -> JobHandle {
        let cached = self.cache.get(&request.fingerprint).is_some();

        let mut state = self.state.lock();
        let id = state.jobs.len();
        let job = AnalysisJob {
            id,
            group_id: request.group_id.clone(),
            repository: request.repository.clone(),
            fingerprint: request.fingerprint.clone(),
            status: if cached {
                JobStatus::Succeeded
            } else {
                JobStatus::Pending
            },
            attempts: 0,
            last_error: None,
            last_message: None,
            transient_exhausted: false,
            from_cache: cached,
            coalesced: false,
        };

        if cached {
            debug!(group = %job.group_id, "Served from cache");
        } else {
            state.pending.push_back(id);
        }

        let (tx, rx) = watch::channel(JobSignal {
            settled: cached,
            job: job.clone(),
        });
        state.jobs.push(job);
        state.requests.push(Arc::new(request));
        state.signals.push(tx);

        JobHandle { id, rx }
    }

    pub fn result_for(&self, fingerprint: &str) -> Option<AnalysisResult> {
        self.cache.get(fingerprint)
    }

    /// Drain the pending queue with the configured number of workers.
    /// Cancellation stops new calls and leaves unfinished jobs pending.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> RunSummary {
        let pending = self.state.lock().pending.len();
        info!(
            "Running {} pending jobs with {} workers",
            pending, self.settings.workers
        );

        let mut handles = Vec::with_capacity(self.settings.workers);
        for worker_id in 0..self.settings.workers {
            let worker = Worker {
                id: worker_id,
                state: Arc::clone(&self.state),
                generator: Arc::clone(&self.generator),
                cache: Arc::clone(&self.cache),
                limiter: Arc::clone(&self.limiter),
                retry: self.settings.retry.clone(),
                call_timeout: self.settings.call_timeout,
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }

        let cancelled = is_cancelled(&cancel);
        let mut state = self.state.lock();

        // a job can only be left in flight by a worker that died mid-call
        let abandoned: Vec<String> = state.in_flight.keys().cloned().collect();
        for fingerprint in abandoned {
            for id in state.release(&fingerprint) {
                state.pending.push_back(id);
                state.update(id, |job| {
                    job.status = JobStatus::Pending;
                    job.coalesced = false;
                });
            }
        }

        for (job, signal) in state.jobs.iter().zip(&state.signals) {
            signal.send_replace(JobSignal {
                job: job.clone(),
                settled: true,
            });
        }

        let summary = RunSummary {
            jobs: state.jobs.clone(),
            external_calls: state.external_calls,
            cancelled,
        };
        info!(
            succeeded = summary.count(JobStatus::Succeeded),
            failed = summary.count(JobStatus::FailedPermanent),
            pending = summary.count(JobStatus::Pending),
            external_calls = summary.external_calls,
            "Run finished{}",
            if cancelled { " (cancelled)" } else { "" }
        );
        summary
    }
}

enum Claim {
    /// This worker makes the external call
    Owner(JobId, Arc<GenerationRequest>),
    /// Settled from cache or parked on another call
    Handled,
}

struct Worker {
    id: usize,
    state: Arc<Mutex<QueueState>>,
    generator: Arc<dyn DocGenerator>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    call_timeout: Duration,
    cancel: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if is_cancelled(&self.cancel) {
                debug!(worker = self.id, "Cancelled, stopping");
                break;
            }
            match self.claim() {
                None => break,
                Some(Claim::Handled) => continue,
                Some(Claim::Owner(id, request)) => self.execute(id, request).await,
            }
        }
    }

    fn claim(&self) -> Option<Claim> {
        let mut state = self.state.lock();
        let id = state.pending.pop_front()?;
        let fingerprint = state.jobs[id].fingerprint.clone();

        if self.cache.get_in_memory(&fingerprint).is_some() {
            state.update(id, |job| {
                job.status = JobStatus::Succeeded;
                job.from_cache = true;
            });
            return Some(Claim::Handled);
        }

        let coalesced = match state.in_flight.get_mut(&fingerprint) {
            Some(entry) => {
                entry.waiters.push(id);
                true
            }
            None => false,
        };
        if coalesced {
            state.update(id, |job| {
                job.status = JobStatus::InFlight;
                job.coalesced = true;
            });
            return Some(Claim::Handled);
        }

        state.in_flight.insert(
            fingerprint,
            InFlight {
                owner: id,
                waiters: Vec::new(),
            },
        );
        state.update(id, |job| job.status = JobStatus::InFlight);
        Some(Claim::Owner(id, Arc::clone(&state.requests[id])))
    }

    async fn execute(&mut self, id: JobId, request: Arc<GenerationRequest>) {
        let fingerprint = request.fingerprint.clone();
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if !self.limiter.acquire(&mut self.cancel).await {
                self.requeue(&fingerprint);
                return;
            }

            self.begin_attempt(id, attempt);
            debug!(worker = self.id, group = %request.group_id, attempt, "Calling generator");

            let outcome =
                match tokio::time::timeout(self.call_timeout, self.generator.generate(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(GenerationError::new(
                        FailureKind::Timeout,
                        format!("no response within {:?}", self.call_timeout),
                    )),
                };

            if is_cancelled(&self.cancel) {
                debug!(group = %request.group_id, "Discarding outcome of a call finished after cancellation");
                self.requeue(&fingerprint);
                return;
            }

            let err = match outcome {
                Ok(artifact) => {
                    self.cache.insert(AnalysisResult {
                        fingerprint: fingerprint.clone(),
                        model: artifact.model.clone(),
                        artifact,
                        generated_at: Utc::now(),
                    });
                    self.finish(&fingerprint, |job| {
                        job.status = JobStatus::Succeeded;
                        job.last_error = None;
                        job.last_message = None;
                    });
                    return;
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(group = %request.group_id, "Permanent failure: {}", err);
                self.finish(&fingerprint, |job| {
                    job.status = JobStatus::FailedPermanent;
                    job.last_error = Some(err.kind);
                    job.last_message = Some(err.message.clone());
                    job.transient_exhausted = false;
                });
                return;
            }

            if attempt == max_attempts {
                warn!(
                    group = %request.group_id,
                    "Giving up after {} attempts: {}", attempt, err
                );
                self.finish(&fingerprint, |job| {
                    job.status = JobStatus::FailedPermanent;
                    job.last_error = Some(err.kind);
                    job.last_message = Some(err.message.clone());
                    job.transient_exhausted = true;
                });
                return;
            }

            let delay = self.retry.delay(attempt, &fingerprint, err.retry_after);
            warn!(
                group = %request.group_id,
                "Attempt {}/{} failed ({}), retrying in {:?}", attempt, max_attempts, err, delay
            );
            self.record_error(id, &err);
            if !sleep_unless_cancelled(delay, &mut self.cancel).await {
                self.requeue(&fingerprint);
                return;
            }
        }
    }

    fn begin_attempt(&self, id: JobId, attempt: u32) {
        let mut state = self.state.lock();
        state.external_calls += 1;
        state.update(id, |job| job.attempts = attempt);
    }

    fn record_error(&self, id: JobId, err: &GenerationError) {
        self.state.lock().update(id, |job| {
            job.last_error = Some(err.kind);
            job.last_message = Some(err.message.clone());
        });
    }

    /// Apply the call's outcome to the owner and every waiter
    fn finish<F: Fn(&mut AnalysisJob)>(&self, fingerprint: &str, apply: F) {
        let mut state = self.state.lock();
        for id in state.release(fingerprint) {
            state.update(id, &apply);
        }
    }

    /// Put the owner and its waiters back at the head of the queue
    fn requeue(&self, fingerprint: &str) {
        let mut state = self.state.lock();
        let ids = state.release(fingerprint);
        for &id in ids.iter().rev() {
            state.pending.push_front(id);
        }
        for id in ids {
            state.update(id, |job| {
                job.status = JobStatus::Pending;
                job.coalesced = false;
            });
        }
    }
}
