use chrono::Utc;
use uuid::Uuid;

use crate::error::{DispatchError, ProtocolError};
use crate::fingerprint::Fingerprint;
use crate::protocol::{WorkerId, WorkerMessage};
use crate::scheduler::job::Job;
use crate::scheduler::registry::WorkerRegistry;
use crate::scheduler::sink::{Completion, ResultSink};
use crate::scheduler::source::RequeueStack;

/// How the controller checks the `worker_hash` on inbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Every message must carry exactly this fingerprint.
    Enforced(Fingerprint),
    /// Development mode: any fingerprint, or none, is accepted.
    Disabled,
}

impl AuthMode {
    pub fn admits(&self, message: &WorkerMessage) -> bool {
        match self {
            AuthMode::Enforced(expected) => expected.matches(message.fingerprint()),
            AuthMode::Disabled => true,
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, AuthMode::Enforced(_))
    }
}

/// Where a job currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLocation {
    Assigned(WorkerId),
    Requeued,
}

/// Everything the dispatcher owns about outstanding work.
///
/// A job id lives in exactly one place: one worker's assignment map, or the
/// requeue stack.
#[derive(Debug, Default)]
pub struct DispatchState {
    pub registry: WorkerRegistry,
    pub requeue: RequeueStack,
}

impl DispatchState {
    pub fn new(max_jobs_per_worker: usize) -> Self {
        Self {
            registry: WorkerRegistry::new(max_jobs_per_worker),
            requeue: RequeueStack::new(),
        }
    }

    /// Put orphaned jobs up for redelivery. Returns how many were added.
    pub fn orphan(&mut self, jobs: Vec<Job>) -> usize {
        self.requeue.extend(jobs)
    }

    /// Drop a worker and requeue everything it held.
    pub fn evict(&mut self, worker_id: &WorkerId) -> Option<usize> {
        let jobs = self.registry.remove(worker_id)?;
        Some(self.orphan(jobs))
    }

    /// No job assigned anywhere and nothing waiting for redelivery.
    pub fn is_settled(&self) -> bool {
        self.registry.assigned_count() == 0 && self.requeue.is_empty()
    }

    /// Every outstanding job id with its location. A healthy state never lists
    /// the same id twice.
    pub fn job_locations(&self) -> Vec<(Uuid, JobLocation)> {
        let assigned = self.registry.workers().flat_map(|w| {
            w.assigned_ids()
                .map(move |id| (*id, JobLocation::Assigned(w.id.clone())))
        });
        let requeued = self.requeue.iter().map(|j| (j.id, JobLocation::Requeued));
        assigned.chain(requeued).collect()
    }
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// A new worker joined.
    Registered,
    /// Known worker re-authenticated with nothing outstanding.
    AlreadyActive,
    /// Known worker re-authenticated while holding work; the work was requeued.
    Reconnected { requeued: usize },
    /// Liveness probe. The caller owes the worker a `pong`.
    Pong { registered: bool },
    Disconnected { requeued: usize },
    Completed { job_id: Uuid },
    /// Message from a worker we have no entry for, typically after a
    /// controller restart.
    IgnoredUnknownWorker,
}

/// Applies inbound worker messages to the dispatch state.
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    auth: AuthMode,
}

impl ProtocolHandler {
    pub fn new(auth: AuthMode) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &AuthMode {
        &self.auth
    }

    /// Decode and apply one raw frame from `worker_id`.
    pub fn handle<S: ResultSink>(
        &self,
        state: &mut DispatchState,
        sink: &mut S,
        worker_id: &WorkerId,
        body: &[u8],
    ) -> Result<Handled, DispatchError> {
        let message = WorkerMessage::decode(body)?;
        self.apply(state, sink, worker_id, message)
    }

    /// Apply an already decoded message.
    ///
    /// Rejected messages leave `state` untouched.
    pub fn apply<S: ResultSink>(
        &self,
        state: &mut DispatchState,
        sink: &mut S,
        worker_id: &WorkerId,
        message: WorkerMessage,
    ) -> Result<Handled, DispatchError> {
        if matches!(message, WorkerMessage::Pong) {
            return Err(ProtocolError::UnexpectedMessage("pong").into());
        }

        if !self.auth.admits(&message) {
            return Err(DispatchError::AuthenticationFailure {
                worker_id: worker_id.clone(),
                presented: message.fingerprint().map(str::to_string),
            });
        }

        match message {
            WorkerMessage::Auth { .. } | WorkerMessage::Connect { .. } => {
                Ok(Self::on_connect(state, worker_id))
            }
            WorkerMessage::Ping { .. } => {
                let registered = state.registry.register(worker_id.clone());
                if registered {
                    tracing::info!(worker_id = %worker_id, "Worker registered by ping");
                } else {
                    state.registry.touch(worker_id);
                }
                Ok(Handled::Pong { registered })
            }
            WorkerMessage::Disconnect { .. } => match state.evict(worker_id) {
                Some(requeued) => {
                    tracing::info!(worker_id = %worker_id, requeued, "Worker disconnected");
                    Ok(Handled::Disconnected { requeued })
                }
                None => {
                    tracing::debug!(worker_id = %worker_id, "Disconnect from unknown worker ignored");
                    Ok(Handled::IgnoredUnknownWorker)
                }
            },
            WorkerMessage::JobDone { job_id, result, .. } => {
                if !state.registry.contains(worker_id) {
                    tracing::debug!(worker_id = %worker_id, job_id = %job_id, "Completion from unknown worker ignored");
                    return Ok(Handled::IgnoredUnknownWorker);
                }
                let job = state.registry.complete(worker_id, &job_id).ok_or_else(|| {
                    ProtocolError::StaleCompletion {
                        worker_id: worker_id.clone(),
                        job_id,
                    }
                })?;
                state.registry.touch(worker_id);
                sink.accept(Completion {
                    worker_id: worker_id.clone(),
                    job,
                    result,
                    completed_at: Utc::now(),
                });
                Ok(Handled::Completed { job_id })
            }
            WorkerMessage::Pong => Err(ProtocolError::UnexpectedMessage("pong").into()),
        }
    }

    fn on_connect(state: &mut DispatchState, worker_id: &WorkerId) -> Handled {
        if state.registry.register(worker_id.clone()) {
            tracing::info!(worker_id = %worker_id, "Worker connected");
            return Handled::Registered;
        }

        state.registry.touch(worker_id);
        let leftover = state.registry.take_assignments(worker_id);
        if leftover.is_empty() {
            tracing::debug!(worker_id = %worker_id, "Worker re-authenticated");
            Handled::AlreadyActive
        } else {
            let requeued = state.orphan(leftover);
            tracing::info!(worker_id = %worker_id, requeued, "Worker reconnected, requeued its unfinished work");
            Handled::Reconnected { requeued }
        }
    }
}
