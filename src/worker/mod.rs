//! Worker process: connects to the controller, computes jobs, reports results.
//!
//! # Components
//!
//! - [`WorkerAgent`]: the polling loop and session management
//! - [`compute`]: the [`Compute`] trait and the [`Squarer`] reference workload
//! - [`heartbeat`]: controller liveness probe
//!
//! # Session lifecycle
//!
//! 1. Connect and announce the identity token
//! 2. Send `auth` with the fingerprint
//! 3. Poll for jobs; answer each with `job_done`
//! 4. After a long idle stretch, `ping`; on `pong` disconnect, reconnect and
//!    re-`auth`, otherwise back off and probe again
//! 5. On the way out, always send `disconnect`

pub mod agent;
pub mod compute;
pub mod heartbeat;

pub use agent::{AgentSettings, AgentStats, WorkerAgent};
pub use compute::{Compute, ComputeError, Squarer};

use tokio_util::sync::CancellationToken;

use crate::clock::{SleepProvider, TokioSleep};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::protocol::WorkerId;
use crate::transport::TcpLink;

/// Run a worker over TCP until `shutdown` fires.
pub async fn run_worker(config: WorkerConfig, shutdown: CancellationToken) -> Result<AgentStats> {
    let identity = match &config.identity {
        Some(id) => WorkerId::from(id.as_str()),
        None => WorkerId::random(),
    };
    let fingerprint = match &config.fingerprint {
        Some(fp) => fp.clone(),
        None => Fingerprint::of_current_exe()?,
    };

    let Some(link) = connect_with_retry(&config, identity, &shutdown).await else {
        return Ok(AgentStats::default());
    };

    let compute = if config.jitter {
        Squarer::reference()
    } else {
        Squarer::new()
    };
    let mut agent = WorkerAgent::new(
        link,
        compute,
        TokioSleep,
        Some(fingerprint),
        AgentSettings::from(&config),
    );
    agent.run(&shutdown).await
}

/// Keep dialing the controller until it answers or shutdown fires.
async fn connect_with_retry(
    config: &WorkerConfig,
    identity: WorkerId,
    shutdown: &CancellationToken,
) -> Option<TcpLink> {
    loop {
        match TcpLink::connect(config.controller_addr.clone(), identity.clone()).await {
            Ok(link) => return Some(link),
            Err(e) => {
                tracing::warn!(
                    addr = %config.controller_addr,
                    error = %e,
                    backoff_ms = config.backoff_ms,
                    "Controller not reachable, retrying"
                );
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = TokioSleep.sleep(config.backoff()) => {}
        }
    }
}
