use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::WorkerId;
use crate::transport::memory::MemoryConnector;
use crate::transport::{tcp, RouterEvent, Transport};

#[derive(Debug)]
struct Route {
    connection: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Identity-addressed endpoint the controller binds.
///
/// Route bookkeeping happens lazily inside [`Transport::try_recv`], so the
/// route table is only ever touched by whoever owns the router.
#[derive(Debug)]
pub struct Router {
    events: mpsc::UnboundedReceiver<RouterEvent>,
    routes: HashMap<WorkerId, Route>,
    local_addr: Option<SocketAddr>,
}

impl Router {
    fn with_events(
        events: mpsc::UnboundedReceiver<RouterEvent>,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            events,
            routes: HashMap::new(),
            local_addr,
        }
    }

    /// Bind a TCP endpoint and start accepting workers in the background.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(tcp::accept_loop(listener, tx));
        tracing::info!(addr = %local_addr, "Router listening");
        Ok(Self::with_events(rx, Some(local_addr)))
    }

    /// A router fed by in-process links.
    pub fn in_memory() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_events(rx, None), MemoryConnector::new(tx))
    }

    /// The bound TCP address, if this is a TCP router.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Transport for Router {
    fn try_recv(&mut self) -> Option<(WorkerId, Bytes)> {
        loop {
            match self.events.try_recv().ok()? {
                RouterEvent::Attached {
                    identity,
                    connection,
                    outbound,
                } => {
                    let previous = self
                        .routes
                        .insert(identity.clone(), Route { connection, outbound });
                    if previous.is_some() {
                        tracing::debug!(worker_id = %identity, connection, "Route replaced by newer connection");
                    }
                }
                RouterEvent::Frame { identity, body } => return Some((identity, body)),
                RouterEvent::Detached {
                    identity,
                    connection,
                } => {
                    if self
                        .routes
                        .get(&identity)
                        .is_some_and(|r| r.connection == connection)
                    {
                        self.routes.remove(&identity);
                        tracing::debug!(worker_id = %identity, connection, "Route dropped");
                    }
                }
            }
        }
    }

    fn send(&mut self, worker_id: &WorkerId, body: Bytes) -> Result<(), TransportError> {
        let route = self
            .routes
            .get(worker_id)
            .ok_or_else(|| TransportError::NoRoute(worker_id.clone()))?;
        if route.outbound.send(body).is_err() {
            self.routes.remove(worker_id);
            return Err(TransportError::NoRoute(worker_id.clone()));
        }
        Ok(())
    }
}
