use thiserror::Error;
use uuid::Uuid;

use crate::protocol::WorkerId;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Authentication failed for worker {worker_id}, got fingerprint {presented:?}")]
    AuthenticationFailure {
        worker_id: WorkerId,
        presented: Option<String>,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Undecodable message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Messages that decoded fine but make no sense in the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message type {0:?}")]
    UnknownMessageType(String),

    #[error("Unexpected {0} message from a worker")]
    UnexpectedMessage(&'static str),

    #[error("Worker {worker_id} completed job {job_id} it does not hold")]
    StaleCompletion { worker_id: WorkerId, job_id: Uuid },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No route to worker {0}")]
    NoRoute(WorkerId),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
