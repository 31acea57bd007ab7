//! Message transport between the controller and its workers.
//!
//! The controller side is a ROUTER-style endpoint: every inbound frame is
//! tagged with the identity of the worker that sent it, and outbound frames
//! are addressed by identity. The worker side is a single bidirectional
//! [`Link`] to the controller.
//!
//! # Framing
//!
//! Frames are length-delimited. The first frame on a new connection is the
//! worker's identity token; everything after is a message body.
//!
//! # Backends
//!
//! - [`Router::bind`] + [`TcpLink`]: TCP, for real deployments
//! - [`Router::in_memory`] + [`MemoryLink`]: channels, for tests and embedding
//!
//! Both backends feed the same event stream, so the router's routing logic is
//! shared.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::WorkerId;

pub mod memory;
pub mod router;
pub mod tcp;

pub use memory::{MemoryConnector, MemoryLink};
pub use router::Router;
pub use tcp::TcpLink;

/// Controller side of the transport. Never blocks.
pub trait Transport {
    /// Next queued inbound frame, if one is waiting.
    fn try_recv(&mut self) -> Option<(WorkerId, Bytes)>;

    /// Queue a frame for the given worker.
    fn send(&mut self, worker_id: &WorkerId, body: Bytes) -> Result<(), TransportError>;
}

/// Worker side of the transport.
pub trait Link {
    fn identity(&self) -> &WorkerId;

    fn send(&mut self, body: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hand `body` off without waiting for it to be written. Usable from
    /// `Drop`. The link may need a [`reconnect`](Self::reconnect) afterwards.
    fn send_detached(&mut self, body: Bytes) -> Result<(), TransportError>;

    /// Wait up to `wait` for a frame. `Ok(None)` means nothing arrived in time.
    fn recv(
        &mut self,
        wait: Duration,
    ) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;

    /// Drop the current connection and open a fresh one under the same
    /// identity.
    fn reconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// What connection tasks report to the router.
#[derive(Debug)]
pub(crate) enum RouterEvent {
    Attached {
        identity: WorkerId,
        connection: u64,
        outbound: mpsc::UnboundedSender<Bytes>,
    },
    Frame {
        identity: WorkerId,
        body: Bytes,
    },
    Detached {
        identity: WorkerId,
        connection: u64,
    },
}

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed)
}
