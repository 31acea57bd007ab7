use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DispatchError;
use crate::fingerprint::Fingerprint;
use crate::scheduler::handler::AuthMode;
use crate::scheduler::registry::DEFAULT_MAX_JOBS_PER_WORKER;

/// Port the controller listens on unless told otherwise.
pub const DEFAULT_CONTROL_PORT: u16 = 5755;

/// How the controller authenticates workers.
///
/// Resolution order: `skip_auth`, then an explicit `fingerprint`, then the
/// digest of `worker_binary`, then the digest of the running executable.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Accept any fingerprint, or none. Development only.
    pub skip_auth: bool,

    /// Expected fingerprint, as distributed with the worker build.
    pub fingerprint: Option<Fingerprint>,

    /// Worker executable to fingerprint at startup.
    pub worker_binary: Option<PathBuf>,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self {
            skip_auth: true,
            ..Default::default()
        }
    }

    pub fn enforced(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint: Some(fingerprint),
            ..Default::default()
        }
    }

    pub fn resolve(&self) -> Result<AuthMode, DispatchError> {
        if self.skip_auth {
            return Ok(AuthMode::Disabled);
        }
        if let Some(fp) = &self.fingerprint {
            return Ok(AuthMode::Enforced(fp.clone()));
        }
        let fp = match &self.worker_binary {
            Some(path) => Fingerprint::of_file(path)?,
            None => Fingerprint::of_current_exe()?,
        };
        Ok(AuthMode::Enforced(fp))
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub listen_addr: SocketAddr,
    /// Jobs a single worker may hold at once.
    pub max_jobs_per_worker: usize,
    /// Size of the reference workload.
    pub total_jobs: u64,
    /// Pause between dispatch attempts while no worker has room.
    pub idle_interval_ms: u64,
    pub auth: AuthConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)),
            max_jobs_per_worker: DEFAULT_MAX_JOBS_PER_WORKER,
            total_jobs: 10_000,
            idle_interval_ms: 100,
            auth: AuthConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_max_jobs_per_worker(mut self, max: usize) -> Self {
        self.max_jobs_per_worker = max;
        self
    }

    pub fn with_total_jobs(mut self, total: u64) -> Self {
        self.total_jobs = total;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_jobs_per_worker == 0 {
            return Err(DispatchError::Config(
                "max_jobs_per_worker must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Controller endpoint, `host:port`.
    pub controller_addr: String,
    /// Identity token; a random one is generated when unset.
    pub identity: Option<String>,
    /// Bounded wait for each poll of the link.
    pub poll_interval_ms: u64,
    /// Consecutive empty polls before probing the controller.
    pub idle_threshold: u32,
    /// Empty polls to wait for a `pong` before giving up on a probe.
    pub ping_retries: u32,
    /// Pause after an unanswered probe or a failed reconnect.
    pub backoff_ms: u64,
    /// Override for the fingerprint sent to the controller.
    pub fingerprint: Option<Fingerprint>,
    /// Add the reference workload's random delay to every job.
    pub jitter: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            controller_addr: format!("127.0.0.1:{}", DEFAULT_CONTROL_PORT),
            identity: None,
            poll_interval_ms: 100,
            idle_threshold: 100,
            ping_retries: 100,
            backoff_ms: 5_000,
            fingerprint: None,
            jitter: true,
        }
    }
}

impl WorkerConfig {
    pub fn new(controller_addr: impl Into<String>) -> Self {
        Self {
            controller_addr: controller_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
