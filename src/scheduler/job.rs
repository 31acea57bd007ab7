use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Payload;

/// A unit of work. The id is minted once and survives every requeue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: Payload,
    /// Position in the order the source minted jobs. Used to keep requeue
    /// order deterministic when a worker's assignments are orphaned.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(sequence: u64, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            sequence,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(id: Uuid, sequence: u64, payload: Payload) -> Self {
        Self {
            id,
            payload,
            sequence,
            created_at: Utc::now(),
        }
    }
}
