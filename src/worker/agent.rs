use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::SleepProvider;
use crate::config::WorkerConfig;
use crate::error::DispatchError;
use crate::fingerprint::Fingerprint;
use crate::protocol::{ControlFrame, ControllerMessage, JobFrame, Payload, WorkerMessage};
use crate::transport::Link;
use crate::worker::compute::Compute;
use crate::worker::heartbeat::{Liveness, LivenessProbe};

/// Timing knobs for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Bounded wait for each poll of the link.
    pub poll_interval: Duration,
    /// Empty polls in a row before the controller is probed.
    pub idle_threshold: u32,
    /// Extra polls to wait for a `pong`.
    pub ping_retries: u32,
    /// Pause after an unanswered probe or a failed reconnect.
    pub backoff: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for AgentSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            idle_threshold: config.idle_threshold,
            ping_retries: config.ping_retries,
            backoff: config.backoff(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgentStats {
    /// `job_done` messages delivered, including failed computations.
    pub jobs_completed: u64,
    pub compute_failures: u64,
    pub decode_failures: u64,
    pub probes: u64,
    pub reconnects: u64,
    pub backoffs: u64,
}

/// Worker side of the protocol.
///
/// Authenticates, then polls the link for jobs, computes each one and reports
/// back. A long quiet spell triggers a liveness probe: if the controller
/// answers, the agent starts a fresh session so anything the controller still
/// thinks it holds is requeued; if not, it backs off and probes again. A
/// broken link is re-established under the same identity.
///
/// [`run`](Self::run) always ends by telling the controller it is leaving,
/// even when the future is dropped early or a computation panics.
pub struct WorkerAgent<L, C, Z> {
    link: L,
    compute: C,
    sleeper: Z,
    fingerprint: Option<Fingerprint>,
    settings: AgentSettings,
    probe: LivenessProbe,
    stats: AgentStats,
    idle: u32,
}

impl<L, C, Z> WorkerAgent<L, C, Z>
where
    L: Link,
    C: Compute,
    Z: SleepProvider,
{
    pub fn new(
        link: L,
        compute: C,
        sleeper: Z,
        fingerprint: Option<Fingerprint>,
        settings: AgentSettings,
    ) -> Self {
        let probe = LivenessProbe::new(settings.poll_interval, settings.ping_retries);
        Self {
            link,
            compute,
            sleeper,
            fingerprint,
            settings,
            probe,
            stats: AgentStats::default(),
            idle: 0,
        }
    }

    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    /// Serve jobs until `shutdown` fires, then send `disconnect`.
    ///
    /// Only non-transport failures end the loop early; the `disconnect` is
    /// attempted either way.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<AgentStats, DispatchError> {
        tracing::info!(
            worker_id = %self.link.identity(),
            authenticated = self.fingerprint.is_some(),
            "Worker agent starting"
        );
        let mut leaving = Farewell {
            agent: self,
            pending: true,
        };
        let served = leaving.agent.serve(shutdown).await;
        leaving.agent.release().await;
        leaving.pending = false;

        let agent = &*leaving.agent;
        if let Err(e) = &served {
            tracing::error!(worker_id = %agent.link.identity(), error = %e, "Worker agent failed");
        }
        served.map(|()| agent.stats.clone())
    }

    async fn serve(&mut self, shutdown: &CancellationToken) -> Result<(), DispatchError> {
        let mut step = self.authenticate().await;
        loop {
            match step {
                Ok(()) => {}
                Err(DispatchError::Transport(e)) => {
                    tracing::warn!(worker_id = %self.link.identity(), error = %e, "Lost contact with controller");
                    if !self.recover(shutdown).await {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }

            let polled = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                polled = self.link.recv(self.settings.poll_interval) => polled,
            };
            step = match polled {
                Ok(Some(frame)) => self.on_frame(frame).await,
                Ok(None) => self.on_idle(shutdown).await,
                Err(e) => Err(e.into()),
            };
        }
    }

    async fn authenticate(&mut self) -> Result<(), DispatchError> {
        let auth = WorkerMessage::auth(self.fingerprint.as_ref()).encode()?;
        self.link.send(auth).await?;
        tracing::info!(worker_id = %self.link.identity(), "Sent auth to controller");
        Ok(())
    }

    async fn on_frame(&mut self, frame: Bytes) -> Result<(), DispatchError> {
        match ControllerMessage::decode(&frame) {
            Ok(ControllerMessage::Job(JobFrame(job_id, payload))) => {
                self.execute(job_id, payload).await
            }
            Ok(ControllerMessage::Control(ControlFrame::Pong)) => {
                tracing::debug!(worker_id = %self.link.identity(), "Late pong ignored");
                Ok(())
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::warn!(worker_id = %self.link.identity(), error = %e, "Dropped undecodable frame");
                Ok(())
            }
        }
    }

    async fn execute(&mut self, job_id: Uuid, payload: Payload) -> Result<(), DispatchError> {
        tracing::debug!(worker_id = %self.link.identity(), job_id = %job_id, "Received job");
        let result = match self.compute.compute(&payload).await {
            Ok(value) => value,
            Err(e) => {
                self.stats.compute_failures += 1;
                tracing::warn!(job_id = %job_id, error = %e, "Job failed");
                json!({ "error": e.to_string() })
            }
        };

        let done = WorkerMessage::job_done(job_id, result, self.fingerprint.as_ref()).encode()?;
        self.link.send(done).await?;
        self.stats.jobs_completed += 1;
        self.idle = 0;
        tracing::debug!(worker_id = %self.link.identity(), job_id = %job_id, "Reported job done");
        Ok(())
    }

    async fn on_idle(&mut self, shutdown: &CancellationToken) -> Result<(), DispatchError> {
        self.idle = self.idle.saturating_add(1);
        if self.idle <= self.settings.idle_threshold {
            return Ok(());
        }

        self.stats.probes += 1;
        tracing::info!(worker_id = %self.link.identity(), idle_polls = self.idle, "No work lately, probing controller");
        let ping = WorkerMessage::ping(self.fingerprint.as_ref()).encode()?;
        let liveness = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            liveness = self.probe.probe(&mut self.link, ping) => liveness,
        };
        match liveness {
            Liveness::Alive => {
                self.reset_session().await?;
                self.idle = 0;
            }
            Liveness::Unresponsive => {
                // idle stays past the threshold, so the next empty poll probes again
                self.stats.backoffs += 1;
                tracing::warn!(
                    worker_id = %self.link.identity(),
                    backoff_ms = self.settings.backoff.as_millis() as u64,
                    "Controller did not answer ping, backing off"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = self.sleeper.sleep(self.settings.backoff) => {}
                }
            }
        }
        Ok(())
    }

    /// `disconnect`, fresh connection, `auth`.
    async fn reset_session(&mut self) -> Result<(), DispatchError> {
        let bye = WorkerMessage::disconnect(self.fingerprint.as_ref()).encode()?;
        self.link.send(bye).await?;
        self.rejoin().await?;
        tracing::info!(worker_id = %self.link.identity(), "Reconnected to controller");
        Ok(())
    }

    async fn rejoin(&mut self) -> Result<(), DispatchError> {
        self.link.reconnect().await?;
        self.stats.reconnects += 1;
        self.authenticate().await
    }

    /// Re-establish the link, backing off between attempts. Returns false if
    /// shutdown fired first.
    async fn recover(&mut self, shutdown: &CancellationToken) -> bool {
        loop {
            if shutdown.is_cancelled() {
                return false;
            }
            match self.rejoin().await {
                Ok(()) => {
                    self.idle = 0;
                    tracing::info!(worker_id = %self.link.identity(), "Rejoined controller");
                    return true;
                }
                Err(e) => {
                    self.stats.backoffs += 1;
                    tracing::warn!(worker_id = %self.link.identity(), error = %e, "Reconnect failed, backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => return false,
                        _ = self.sleeper.sleep(self.settings.backoff) => {}
                    }
                }
            }
        }
    }

    async fn release(&mut self) {
        let sent = match WorkerMessage::disconnect(self.fingerprint.as_ref()).encode() {
            Ok(bye) => self.link.send(bye).await.map_err(DispatchError::from),
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => tracing::info!(worker_id = %self.link.identity(), "Sent disconnect to controller"),
            Err(e) => {
                tracing::warn!(worker_id = %self.link.identity(), error = %e, "Could not send disconnect")
            }
        }
    }
}

/// Sends `disconnect` if [`WorkerAgent::run`] is torn down before it could.
struct Farewell<'a, L: Link, C, Z> {
    agent: &'a mut WorkerAgent<L, C, Z>,
    pending: bool,
}

impl<L: Link, C, Z> Drop for Farewell<'_, L, C, Z> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let agent = &mut *self.agent;
        let sent = WorkerMessage::disconnect(agent.fingerprint.as_ref())
            .encode()
            .and_then(|bye| agent.link.send_detached(bye).map_err(DispatchError::from));
        match sent {
            Ok(()) => tracing::info!(
                worker_id = %agent.link.identity(),
                "Worker agent interrupted, sent disconnect to controller"
            ),
            Err(e) => tracing::warn!(
                worker_id = %agent.link.identity(),
                error = %e,
                "Worker agent interrupted, could not send disconnect"
            ),
        }
    }
}
