use std::time::Duration;

use bytes::Bytes;

use crate::protocol::ControllerMessage;
use crate::transport::Link;

/// Outcome of a controller liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Unresponsive,
}

/// Sends one `ping` and waits a bounded number of polls for the `pong`.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    wait: Duration,
    retries: u32,
}

impl LivenessProbe {
    pub fn new(wait: Duration, retries: u32) -> Self {
        Self { wait, retries }
    }

    pub async fn probe<L: Link>(&self, link: &mut L, ping: Bytes) -> Liveness {
        if let Err(e) = link.send(ping).await {
            tracing::warn!(worker_id = %link.identity(), error = %e, "Failed to send ping");
            return Liveness::Unresponsive;
        }

        for _ in 0..=self.retries {
            match link.recv(self.wait).await {
                Ok(None) => continue,
                Ok(Some(frame)) => match ControllerMessage::decode(&frame) {
                    Ok(message) if message.is_pong() => return Liveness::Alive,
                    // a job sent just before the probe; the controller requeues
                    // it once we reconnect
                    Ok(_) => {
                        tracing::debug!(worker_id = %link.identity(), "Discarded frame while waiting for pong");
                    }
                    Err(e) => {
                        tracing::debug!(worker_id = %link.identity(), error = %e, "Undecodable frame while waiting for pong");
                    }
                },
                Err(e) => {
                    tracing::warn!(worker_id = %link.identity(), error = %e, "Link failed while waiting for pong");
                    return Liveness::Unresponsive;
                }
            }
        }
        Liveness::Unresponsive
    }
}
