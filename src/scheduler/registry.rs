use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use uuid::Uuid;

use crate::protocol::WorkerId;
use crate::scheduler::job::Job;

/// Default cap on jobs concurrently assigned to one worker. Keeps memory use
/// reasonable and limits the shuffling when a worker dies.
pub const DEFAULT_MAX_JOBS_PER_WORKER: usize = 50;

/// Controller-side bookkeeping for one connected worker.
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub id: WorkerId,
    pub registered_at: Instant,
    pub last_seen: Instant,
    assigned: HashMap<Uuid, Job>,
}

impl WorkerEntry {
    pub fn new(id: WorkerId) -> Self {
        let now = Instant::now();
        Self {
            id,
            registered_at: now,
            last_seen: now,
            assigned: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Number of jobs currently assigned.
    pub fn load(&self) -> usize {
        self.assigned.len()
    }

    pub fn holds(&self, job_id: &Uuid) -> bool {
        self.assigned.contains_key(job_id)
    }

    pub fn assigned_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.assigned.keys()
    }

    /// Empty the assignment map, oldest job first.
    fn drain_assignments(&mut self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.assigned.drain().map(|(_, job)| job).collect();
        jobs.sort_by_key(|j| j.sequence);
        jobs
    }
}

/// Tracks connected workers and the jobs each one holds.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
    max_jobs_per_worker: usize,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JOBS_PER_WORKER)
    }
}

impl WorkerRegistry {
    pub fn new(max_jobs_per_worker: usize) -> Self {
        Self {
            workers: BTreeMap::new(),
            max_jobs_per_worker,
        }
    }

    pub fn max_jobs_per_worker(&self) -> usize {
        self.max_jobs_per_worker
    }

    /// Register a worker with an empty assignment map. Returns false if the
    /// worker was already known, in which case nothing changes.
    pub fn register(&mut self, worker_id: WorkerId) -> bool {
        if self.workers.contains_key(&worker_id) {
            return false;
        }
        self.workers
            .insert(worker_id.clone(), WorkerEntry::new(worker_id));
        true
    }

    pub fn contains(&self, worker_id: &WorkerId) -> bool {
        self.workers.contains_key(worker_id)
    }

    pub fn touch(&mut self, worker_id: &WorkerId) {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.touch();
        }
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<&WorkerEntry> {
        self.workers.get(worker_id)
    }

    pub fn load(&self, worker_id: &WorkerId) -> Option<usize> {
        self.workers.get(worker_id).map(WorkerEntry::load)
    }

    /// Pick the least loaded worker, if it still has room.
    ///
    /// Ties go to the lexicographically smallest identity. Recomputed on every
    /// call; nothing is sticky.
    pub fn select_worker(&self) -> Option<WorkerId> {
        // BTreeMap iterates in key order and min_by_key keeps the first minimum
        let worker = self.workers.values().min_by_key(|w| w.load())?;
        if worker.load() < self.max_jobs_per_worker {
            Some(worker.id.clone())
        } else {
            None
        }
    }

    /// Record `job` as assigned to `worker_id`. Hands the job back if the
    /// worker is unknown or already at capacity.
    pub fn assign(&mut self, worker_id: &WorkerId, job: Job) -> Result<(), Job> {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return Err(job);
        };
        if worker.load() >= self.max_jobs_per_worker || worker.holds(&job.id) {
            return Err(job);
        }
        worker.assigned.insert(job.id, job);
        Ok(())
    }

    /// Remove a finished job from the worker's map.
    pub fn complete(&mut self, worker_id: &WorkerId, job_id: &Uuid) -> Option<Job> {
        self.workers
            .get_mut(worker_id)
            .and_then(|w| w.assigned.remove(job_id))
    }

    /// Strip a worker of its assignments while keeping it registered.
    pub fn take_assignments(&mut self, worker_id: &WorkerId) -> Vec<Job> {
        self.workers
            .get_mut(worker_id)
            .map(WorkerEntry::drain_assignments)
            .unwrap_or_default()
    }

    /// Forget a worker, returning whatever it still held.
    pub fn remove(&mut self, worker_id: &WorkerId) -> Option<Vec<Job>> {
        self.workers
            .remove(worker_id)
            .map(|mut w| w.drain_assignments())
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerEntry> {
        self.workers.values()
    }

    /// Jobs assigned across all workers.
    pub fn assigned_count(&self) -> usize {
        self.workers.values().map(WorkerEntry::load).sum()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
