//! Wire messages exchanged between the controller and its workers.
//!
//! Worker → controller messages are JSON objects discriminated by `type`:
//!
//! ```text
//! {"type": "auth",       "worker_hash": "..."}
//! {"type": "connect",    "worker_hash": "..."}      (hash optional)
//! {"type": "ping",       "worker_hash": "..."}
//! {"type": "disconnect", "worker_hash": "..."}
//! {"type": "job_done",   "job_id": "...", "result": ..., "worker_hash": "..."}
//! ```
//!
//! Controller → worker messages are either `{"type": "pong"}` or a job
//! dispatch encoded as the pair `[job_id, payload]`.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DispatchError, ProtocolError};
use crate::fingerprint::Fingerprint;

/// Opaque key/value work bundle.
pub type Payload = serde_json::Map<String, Value>;

/// Message types a worker may legitimately put on the wire.
const KNOWN_TYPES: &[&str] = &["auth", "connect", "ping", "pong", "disconnect", "job_done"];

/// Transport-level worker identity, chosen by the worker when it connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(Bytes);

impl WorkerId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Ten random hex characters, the same shape the reference workers use.
    pub fn random() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(Bytes::from(hex[..10].to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Auth {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_hash: Option<String>,
    },
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_hash: Option<String>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_hash: Option<String>,
    },
    Pong,
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_hash: Option<String>,
    },
    JobDone {
        job_id: Uuid,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_hash: Option<String>,
    },
}

fn hash_of(fingerprint: Option<&Fingerprint>) -> Option<String> {
    fingerprint.map(|fp| fp.as_str().to_string())
}

impl WorkerMessage {
    pub fn auth(fingerprint: Option<&Fingerprint>) -> Self {
        Self::Auth {
            worker_hash: hash_of(fingerprint),
        }
    }

    pub fn connect(fingerprint: Option<&Fingerprint>) -> Self {
        Self::Connect {
            worker_hash: hash_of(fingerprint),
        }
    }

    pub fn ping(fingerprint: Option<&Fingerprint>) -> Self {
        Self::Ping {
            worker_hash: hash_of(fingerprint),
        }
    }

    pub fn disconnect(fingerprint: Option<&Fingerprint>) -> Self {
        Self::Disconnect {
            worker_hash: hash_of(fingerprint),
        }
    }

    pub fn job_done(job_id: Uuid, result: Value, fingerprint: Option<&Fingerprint>) -> Self {
        Self::JobDone {
            job_id,
            result,
            worker_hash: hash_of(fingerprint),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Connect { .. } => "connect",
            Self::Ping { .. } => "ping",
            Self::Pong => "pong",
            Self::Disconnect { .. } => "disconnect",
            Self::JobDone { .. } => "job_done",
        }
    }

    /// The `worker_hash` the message was sent with, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            Self::Auth { worker_hash }
            | Self::Connect { worker_hash }
            | Self::Ping { worker_hash }
            | Self::Disconnect { worker_hash }
            | Self::JobDone { worker_hash, .. } => worker_hash.as_deref(),
            Self::Pong => None,
        }
    }

    /// Decode a frame body.
    ///
    /// Malformed JSON, a missing `type` or bad fields are decode errors; a
    /// well-formed message of a type nobody speaks is a protocol error.
    pub fn decode(body: &[u8]) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_slice(body)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                <serde_json::Error as serde::de::Error>::custom("missing \"type\" discriminator")
            })?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownMessageType(kind.to_string()).into());
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn encode(&self) -> Result<Bytes, DispatchError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Pong,
}

/// A job on its way to a worker: `[job_id, payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFrame(pub Uuid, pub Payload);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControllerMessage {
    Control(ControlFrame),
    Job(JobFrame),
}

impl ControllerMessage {
    pub fn pong() -> Self {
        Self::Control(ControlFrame::Pong)
    }

    pub fn job(job_id: Uuid, payload: Payload) -> Self {
        Self::Job(JobFrame(job_id, payload))
    }

    pub fn decode(body: &[u8]) -> Result<Self, DispatchError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn encode(&self) -> Result<Bytes, DispatchError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn is_pong(&self) -> bool {
        matches!(self, Self::Control(ControlFrame::Pong))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn worker_messages_use_type_discriminator() {
        let fp: Fingerprint = "0123456789".parse().unwrap();
        let encoded = WorkerMessage::auth(Some(&fp)).encode().unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, json!({"type": "auth", "worker_hash": "0123456789"}));

        let encoded = WorkerMessage::connect(None).encode().unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, json!({"type": "connect"}));
    }

    #[test]
    fn job_done_decodes_with_result() {
        let job_id = Uuid::new_v4();
        let body = json!({
            "type": "job_done",
            "job_id": job_id,
            "result": 16,
            "worker_hash": "0123456789",
        });
        let msg = WorkerMessage::decode(body.to_string().as_bytes()).unwrap();
        assert_eq!(msg.kind(), "job_done");
        assert_eq!(msg.fingerprint(), Some("0123456789"));
        match msg {
            WorkerMessage::JobDone { job_id: id, result, .. } => {
                assert_eq!(id, job_id);
                assert_eq!(result, json!(16));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let err = WorkerMessage::decode(br#"{"type": "reboot"}"#).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Protocol(ProtocolError::UnknownMessageType(ref t)) if t == "reboot"
        ));
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(
            WorkerMessage::decode(b"not json"),
            Err(DispatchError::Decode(_))
        ));
        assert!(matches!(
            WorkerMessage::decode(br#"{"message": "auth"}"#),
            Err(DispatchError::Decode(_))
        ));
        assert!(matches!(
            WorkerMessage::decode(br#"{"type": "job_done", "job_id": "not-a-uuid"}"#),
            Err(DispatchError::Decode(_))
        ));
    }

    #[test]
    fn job_frame_is_a_pair() {
        let job_id = Uuid::new_v4();
        let mut payload = Payload::new();
        payload.insert("number".to_string(), json!(4));
        let encoded = ControllerMessage::job(job_id, payload.clone()).encode().unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, json!([job_id, {"number": 4}]));

        let decoded = ControllerMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, ControllerMessage::job(job_id, payload));
    }

    #[test]
    fn pong_is_distinguished_from_jobs() {
        let encoded = ControllerMessage::pong().encode().unwrap();
        assert_eq!(&encoded[..], br#"{"type":"pong"}"#);
        assert!(ControllerMessage::decode(&encoded).unwrap().is_pong());
    }

    #[test]
    fn worker_id_orders_lexicographically() {
        let a = WorkerId::from("alpha");
        let b = WorkerId::from("beta");
        assert!(a < b);
        assert_eq!(a.to_string(), "alpha");
        assert_eq!(WorkerId::random().as_bytes().len(), 10);
    }
}
