//! Shared helpers for dispatcher, agent and end-to-end tests.
//!
//! Provides in-memory controller setups, scripted workers, a sleep provider
//! that records instead of sleeping, and state invariant checks.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use dispatch_lite::clock::SleepProvider;
use dispatch_lite::config::ControllerConfig;
use dispatch_lite::fingerprint::Fingerprint;
use dispatch_lite::protocol::{ControllerMessage, JobFrame, Payload, WorkerId, WorkerMessage};
use dispatch_lite::scheduler::{
    AuthMode, DispatchState, Dispatcher, JobSource, ProtocolHandler, VecSink,
};
use dispatch_lite::transport::{Link, MemoryConnector, MemoryLink, Router, Transport};

/// Fingerprint the test controllers expect.
pub fn test_fingerprint() -> Fingerprint {
    "0123456789".parse().unwrap()
}

/// A fingerprint no controller expects.
pub fn wrong_fingerprint() -> Fingerprint {
    "fedcba9876".parse().unwrap()
}

/// Sleep provider that records every requested pause and only yields.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleep {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, dur: Duration) -> usize {
        self.calls.lock().unwrap().iter().filter(|d| **d == dur).count()
    }
}

impl SleepProvider for RecordingSleep {
    async fn sleep(&self, dur: Duration) {
        self.calls.lock().unwrap().push(dur);
        tokio::task::yield_now().await;
    }
}

pub type MemoryDispatcher = Dispatcher<Router, VecSink, RecordingSleep>;

/// Dispatcher over an in-memory router, fed from `payloads`.
pub fn memory_dispatcher<I>(
    max_jobs_per_worker: usize,
    auth: AuthMode,
    payloads: I,
) -> (MemoryDispatcher, MemoryConnector)
where
    I: IntoIterator<Item = Payload>,
    I::IntoIter: Send + 'static,
{
    let (router, connector) = Router::in_memory();
    let config = ControllerConfig::default().with_max_jobs_per_worker(max_jobs_per_worker);
    let dispatcher = Dispatcher::new(
        router,
        JobSource::new(payloads),
        VecSink::new(),
        RecordingSleep::new(),
        ProtocolHandler::new(auth),
        &config,
    );
    (dispatcher, connector)
}

/// A worker driven by hand from the test body.
pub struct ScriptedWorker {
    pub link: MemoryLink,
    pub fingerprint: Option<Fingerprint>,
}

impl ScriptedWorker {
    pub fn connect(connector: &MemoryConnector, identity: &str) -> Self {
        Self {
            link: connector.connect(identity),
            fingerprint: Some(test_fingerprint()),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.link.identity().clone()
    }

    pub fn send(&self, message: WorkerMessage) {
        self.link.send_now(message.encode().unwrap()).unwrap();
    }

    pub fn auth(&self) {
        self.send(WorkerMessage::auth(self.fingerprint.as_ref()));
    }

    pub fn disconnect(&self) {
        self.send(WorkerMessage::disconnect(self.fingerprint.as_ref()));
    }

    /// Every job frame received so far.
    pub fn take_jobs(&mut self) -> Vec<(Uuid, Payload)> {
        let mut jobs = Vec::new();
        while let Some(frame) = self.link.try_recv_now() {
            if let ControllerMessage::Job(JobFrame(id, payload)) =
                ControllerMessage::decode(&frame).unwrap()
            {
                jobs.push((id, payload));
            }
        }
        jobs
    }

    /// Answer every pending job with the square of its number.
    pub fn answer_all(&mut self) -> usize {
        let jobs = self.take_jobs();
        for (id, payload) in &jobs {
            self.send(WorkerMessage::job_done(
                *id,
                serde_json::Value::from(square(payload)),
                self.fingerprint.as_ref(),
            ));
        }
        jobs.len()
    }
}

pub fn number_of(payload: &Payload) -> i64 {
    payload["number"].as_i64().unwrap()
}

pub fn square(payload: &Payload) -> i64 {
    let n = number_of(payload);
    n * n
}

/// Each outstanding job id appears exactly once across assignments and the
/// requeue.
pub fn assert_single_ownership(state: &DispatchState) {
    let locations = state.job_locations();
    let mut seen = HashSet::new();
    for (id, location) in &locations {
        assert!(seen.insert(*id), "job {id} listed twice, last at {location:?}");
    }
}

/// Every job the source minted is in exactly one place: assigned, requeued,
/// or completed.
pub fn assert_every_job_accounted(dispatcher: &MemoryDispatcher) {
    let state = dispatcher.state();
    assert_single_ownership(state);

    let mut seen: HashSet<Uuid> = state.job_locations().into_iter().map(|(id, _)| id).collect();
    for completion in &dispatcher.sink().completions {
        assert!(
            seen.insert(completion.job.id),
            "job {} completed but also outstanding or completed twice",
            completion.job.id
        );
    }
    assert_eq!(
        seen.len() as u64,
        dispatcher.source().minted(),
        "minted jobs missing from assignments, requeue and completions"
    );
}

pub fn assert_within_capacity(state: &DispatchState) {
    let cap = state.registry.max_jobs_per_worker();
    for worker in state.registry.workers() {
        assert!(
            worker.load() <= cap,
            "worker {} holds {} jobs, cap is {}",
            worker.id,
            worker.load(),
            cap
        );
    }
}

/// Next message the router has for the test, decoded. Polls with short
/// sleeps up to `timeout`.
pub async fn next_message(
    router: &mut Router,
    timeout: Duration,
) -> Option<(WorkerId, WorkerMessage)> {
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if let Some((id, body)) = router.try_recv() {
            return Some((id, WorkerMessage::decode(&body).unwrap()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

pub fn job_frame(id: Uuid, payload: Payload) -> Bytes {
    ControllerMessage::job(id, payload).encode().unwrap()
}

pub fn pong_frame() -> Bytes {
    ControllerMessage::pong().encode().unwrap()
}
