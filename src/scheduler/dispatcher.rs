use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SleepProvider;
use crate::config::ControllerConfig;
use crate::error::DispatchError;
use crate::protocol::{ControllerMessage, WorkerId};
use crate::scheduler::handler::{DispatchState, Handled, ProtocolHandler};
use crate::scheduler::job::Job;
use crate::scheduler::sink::ResultSink;
use crate::scheduler::source::JobSource;
use crate::transport::Transport;

/// Counters kept by the dispatcher loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub requeued: u64,
    pub auth_failures: u64,
    pub protocol_errors: u64,
    pub decode_errors: u64,
    pub transport_errors: u64,
    pub evictions: u64,
}

/// Result of one scheduling step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// A job went out.
    Dispatched { job_id: Uuid, worker_id: WorkerId },
    /// No worker has room; the job in hand went back on top of the requeue.
    Waiting,
    /// Source exhausted, but workers still hold jobs.
    Draining,
    /// Source exhausted and every job completed.
    Settled,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: DispatchStats,
    /// Fresh jobs the source produced.
    pub minted: u64,
    pub still_assigned: usize,
    pub still_requeued: usize,
    pub workers: usize,
    /// True when shutdown cut the run short.
    pub interrupted: bool,
}

/// The controller's main loop.
///
/// Owns the transport endpoint, the job source and the dispatch state, and is
/// the only thing that touches any of them. Each [`tick`](Self::tick) drains
/// inbound messages without blocking, then tries to place one job on the least
/// loaded worker. [`run`](Self::run) repeats ticks, sleeping through the
/// injected [`SleepProvider`] whenever nothing could be placed.
pub struct Dispatcher<T, S, Z> {
    transport: T,
    source: JobSource,
    sink: S,
    sleeper: Z,
    handler: ProtocolHandler,
    state: DispatchState,
    stats: DispatchStats,
    idle_interval: Duration,
}

impl<T, S, Z> Dispatcher<T, S, Z>
where
    T: Transport,
    S: ResultSink,
    Z: SleepProvider,
{
    pub fn new(
        transport: T,
        source: JobSource,
        sink: S,
        sleeper: Z,
        handler: ProtocolHandler,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            transport,
            source,
            sink,
            sleeper,
            handler,
            state: DispatchState::new(config.max_jobs_per_worker),
            stats: DispatchStats::default(),
            idle_interval: config.idle_interval(),
        }
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn source(&self) -> &JobSource {
        &self.source
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Apply every inbound message that is already queued. Returns how many
    /// were processed.
    pub fn service_inbound(&mut self) -> usize {
        let mut processed = 0;
        while let Some((worker_id, body)) = self.transport.try_recv() {
            self.handle_frame(&worker_id, &body);
            processed += 1;
        }
        processed
    }

    fn handle_frame(&mut self, worker_id: &WorkerId, body: &Bytes) {
        self.stats.messages += 1;
        let outcome = self
            .handler
            .handle(&mut self.state, &mut self.sink, worker_id, body);

        match outcome {
            Ok(Handled::Pong { .. }) => self.reply_pong(worker_id),
            Ok(Handled::Completed { .. }) => self.stats.completed += 1,
            Ok(Handled::Reconnected { requeued }) | Ok(Handled::Disconnected { requeued }) => {
                self.stats.requeued += requeued as u64;
            }
            Ok(Handled::Registered)
            | Ok(Handled::AlreadyActive)
            | Ok(Handled::IgnoredUnknownWorker) => {}
            Err(DispatchError::AuthenticationFailure {
                worker_id,
                presented,
            }) => {
                self.stats.auth_failures += 1;
                tracing::warn!(
                    worker_id = %worker_id,
                    presented = ?presented,
                    "Worker failed authentication, message ignored"
                );
            }
            Err(DispatchError::Protocol(e)) => {
                self.stats.protocol_errors += 1;
                tracing::warn!(worker_id = %worker_id, error = %e, "Protocol error");
            }
            Err(DispatchError::Decode(e)) => {
                self.stats.decode_errors += 1;
                tracing::warn!(worker_id = %worker_id, error = %e, "Dropped undecodable message");
            }
            Err(e) => {
                tracing::warn!(worker_id = %worker_id, error = %e, "Failed to handle worker message");
            }
        }
    }

    fn reply_pong(&mut self, worker_id: &WorkerId) {
        let sent = ControllerMessage::pong()
            .encode()
            .and_then(|frame| {
                self.transport
                    .send(worker_id, frame)
                    .map_err(DispatchError::from)
            });
        if let Err(e) = sent {
            self.stats.transport_errors += 1;
            tracing::warn!(worker_id = %worker_id, error = %e, "Failed to answer ping");
        }
    }

    /// One scheduling step.
    pub fn tick(&mut self) -> Tick {
        self.service_inbound();

        let Some(job) = self.source.next_job(&mut self.state.requeue) else {
            return if self.state.registry.assigned_count() == 0 {
                Tick::Settled
            } else {
                Tick::Draining
            };
        };

        let job_id = job.id;
        match self.place(job) {
            Ok(worker_id) => Tick::Dispatched { job_id, worker_id },
            Err(job) => {
                self.state.requeue.push(job);
                Tick::Waiting
            }
        }
    }

    /// Send `job` to the least loaded worker and record the assignment.
    /// Hands the job back when nobody can take it.
    fn place(&mut self, job: Job) -> Result<WorkerId, Job> {
        let Some(worker_id) = self.state.registry.select_worker() else {
            return Err(job);
        };

        let frame = match ControllerMessage::job(job.id, job.payload.clone()).encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to encode job");
                return Err(job);
            }
        };

        if let Err(e) = self.transport.send(&worker_id, frame) {
            // the worker vanished without saying goodbye
            self.stats.transport_errors += 1;
            self.stats.evictions += 1;
            let requeued = self.state.evict(&worker_id).unwrap_or(0);
            self.stats.requeued += requeued as u64;
            tracing::warn!(
                worker_id = %worker_id,
                error = %e,
                requeued,
                "Worker unreachable, treating it as disconnected"
            );
            return Err(job);
        }

        let job_id = job.id;
        if let Err(job) = self.state.registry.assign(&worker_id, job) {
            tracing::error!(job_id = %job.id, worker_id = %worker_id, "Selected worker refused the job");
            return Err(job);
        }
        self.stats.dispatched += 1;
        tracing::debug!(job_id = %job_id, worker_id = %worker_id, "Sent job to worker");
        Ok(worker_id)
    }

    /// Dispatch until every job has completed or `shutdown` fires.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> RunSummary {
        tracing::info!(
            max_jobs_per_worker = self.state.registry.max_jobs_per_worker(),
            auth_enforced = self.handler.auth().is_enforced(),
            "Dispatcher started"
        );

        let interrupted = loop {
            if shutdown.is_cancelled() {
                break true;
            }
            match self.tick() {
                Tick::Dispatched { .. } => tokio::task::yield_now().await,
                Tick::Waiting | Tick::Draining => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break true,
                        _ = self.sleeper.sleep(self.idle_interval) => {}
                    }
                }
                Tick::Settled => break false,
            }
        };

        let summary = self.summary(interrupted);
        tracing::info!(
            minted = summary.minted,
            dispatched = summary.stats.dispatched,
            completed = summary.stats.completed,
            requeued = summary.stats.requeued,
            still_assigned = summary.still_assigned,
            still_requeued = summary.still_requeued,
            interrupted,
            "Dispatcher stopped"
        );
        summary
    }

    pub fn summary(&self, interrupted: bool) -> RunSummary {
        RunSummary {
            stats: self.stats.clone(),
            minted: self.source.minted(),
            still_assigned: self.state.registry.assigned_count(),
            still_requeued: self.state.requeue.len(),
            workers: self.state.registry.len(),
            interrupted,
        }
    }
}
