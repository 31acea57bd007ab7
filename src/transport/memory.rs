use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::WorkerId;
use crate::transport::{next_connection_id, Link, RouterEvent};

/// Hands out in-process links to an in-memory [`Router`](super::Router).
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl MemoryConnector {
    pub(crate) fn new(events: mpsc::UnboundedSender<RouterEvent>) -> Self {
        Self { events }
    }

    pub fn connect(&self, identity: impl Into<WorkerId>) -> MemoryLink {
        MemoryLink::attach(self.events.clone(), identity.into())
    }
}

/// In-process stand-in for a worker's TCP connection.
///
/// Dropping the link is the same as the socket going away: the router loses
/// the route, but no `disconnect` message is sent.
#[derive(Debug)]
pub struct MemoryLink {
    identity: WorkerId,
    events: mpsc::UnboundedSender<RouterEvent>,
    connection: u64,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryLink {
    fn attach(events: mpsc::UnboundedSender<RouterEvent>, identity: WorkerId) -> Self {
        let (connection, inbound) = Self::open(&events, &identity);
        Self {
            identity,
            events,
            connection,
            inbound,
        }
    }

    fn open(
        events: &mpsc::UnboundedSender<RouterEvent>,
        identity: &WorkerId,
    ) -> (u64, mpsc::UnboundedReceiver<Bytes>) {
        let connection = next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        // a closed router surfaces as Closed on the next send or recv
        let _ = events.send(RouterEvent::Attached {
            identity: identity.clone(),
            connection,
            outbound: tx,
        });
        (connection, rx)
    }

    fn detach(&self) {
        let _ = self.events.send(RouterEvent::Detached {
            identity: self.identity.clone(),
            connection: self.connection,
        });
    }

    /// Send without awaiting; the channel is unbounded.
    pub fn send_now(&self, body: Bytes) -> Result<(), TransportError> {
        self.events
            .send(RouterEvent::Frame {
                identity: self.identity.clone(),
                body,
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Take the next frame if one is already waiting.
    pub fn try_recv_now(&mut self) -> Option<Bytes> {
        self.inbound.try_recv().ok()
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Link for MemoryLink {
    fn identity(&self) -> &WorkerId {
        &self.identity
    }

    async fn send(&mut self, body: Bytes) -> Result<(), TransportError> {
        self.send_now(body)
    }

    fn send_detached(&mut self, body: Bytes) -> Result<(), TransportError> {
        self.send_now(body)
    }

    async fn recv(&mut self, wait: Duration) -> Result<Option<Bytes>, TransportError> {
        match tokio::time::timeout(wait, self.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(TransportError::Closed),
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.detach();
        let (connection, inbound) = Self::open(&self.events, &self.identity);
        self.connection = connection;
        self.inbound = inbound;
        if self.events.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}
