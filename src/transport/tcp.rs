use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TransportError;
use crate::protocol::WorkerId;
use crate::transport::{next_connection_id, Link, RouterEvent};

/// Upper bound on a single frame. Payloads are small key/value bundles.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// How long a reconnecting worker waits for the controller to close the old
/// connection.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

type WorkerFramed = Framed<TcpStream, LengthDelimitedCodec>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Accept workers until the router goes away.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<RouterEvent>,
) {
    loop {
        tokio::select! {
            _ = events.closed() => {
                tracing::debug!("Router dropped, no longer accepting workers");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let events = events.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, peer, events).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept worker connection");
                }
            }
        }
    }
}

/// Pump one worker connection: identity handshake, then frames both ways.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<RouterEvent>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, codec());

    let identity = match framed.next().await {
        Some(Ok(frame)) if !frame.is_empty() => WorkerId::new(frame.freeze()),
        Some(Ok(_)) => {
            tracing::warn!(peer = %peer, "Empty identity frame, dropping connection");
            return;
        }
        Some(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "Identity handshake failed");
            return;
        }
        None => return,
    };

    let connection = next_connection_id();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let attached = RouterEvent::Attached {
        identity: identity.clone(),
        connection,
        outbound: outbound_tx,
    };
    if events.send(attached).is_err() {
        return;
    }
    tracing::debug!(worker_id = %identity, peer = %peer, connection, "Worker attached");

    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(frame)) => {
                    let event = RouterEvent::Frame {
                        identity: identity.clone(),
                        body: frame.freeze(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(worker_id = %identity, error = %e, "Worker connection failed");
                    break;
                }
                None => break,
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(body) => {
                    if let Err(e) = framed.send(body).await {
                        tracing::warn!(worker_id = %identity, error = %e, "Failed to write to worker");
                        break;
                    }
                }
                // route replaced or dropped by the router
                None => break,
            },
        }
    }

    tracing::debug!(worker_id = %identity, connection, "Worker detached");
    let _ = events.send(RouterEvent::Detached {
        identity,
        connection,
    });
}

/// Worker-side TCP connection to the controller.
pub struct TcpLink {
    addr: String,
    identity: WorkerId,
    framed: Option<WorkerFramed>,
}

impl TcpLink {
    /// Connect and announce `identity`.
    pub async fn connect(
        addr: impl Into<String>,
        identity: WorkerId,
    ) -> Result<Self, TransportError> {
        let mut link = Self {
            addr: addr.into(),
            identity,
            framed: None,
        };
        link.open().await?;
        Ok(link)
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, codec());
        framed.send(self.identity.to_bytes()).await?;
        self.framed = Some(framed);
        tracing::debug!(worker_id = %self.identity, addr = %self.addr, "Connected to controller");
        Ok(())
    }

    /// Close our half, then wait for the controller to close its end.
    ///
    /// The controller reads each connection on its own task. Once it has seen
    /// our end of stream, every frame sent on this connection is already on
    /// the router's queue, so nothing sent on the next connection can overtake
    /// it.
    async fn shut_down(&self, mut framed: WorkerFramed) {
        if let Err(e) = SinkExt::<Bytes>::close(&mut framed).await {
            tracing::debug!(worker_id = %self.identity, error = %e, "Old connection already broken");
            return;
        }
        let drained = tokio::time::timeout(CLOSE_WAIT, async {
            // jobs still in flight on the old connection are requeued by the
            // controller
            while let Some(Ok(_)) = framed.next().await {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                worker_id = %self.identity,
                wait_ms = CLOSE_WAIT.as_millis() as u64,
                "Controller kept the old connection open, reconnecting anyway"
            );
        }
    }
}

impl Link for TcpLink {
    fn identity(&self) -> &WorkerId {
        &self.identity
    }

    async fn send(&mut self, body: Bytes) -> Result<(), TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::Closed)?;
        let sent = framed.send(body).await;
        if let Err(e) = sent {
            self.framed = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn recv(&mut self, wait: Duration) -> Result<Option<Bytes>, TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::Closed)?;
        let received = tokio::time::timeout(wait, framed.next()).await;
        match received {
            Err(_) => Ok(None),
            Ok(Some(Ok(frame))) => Ok(Some(frame.freeze())),
            Ok(Some(Err(e))) => {
                self.framed = None;
                Err(e.into())
            }
            Ok(None) => {
                self.framed = None;
                Err(TransportError::Closed)
            }
        }
    }

    fn send_detached(&mut self, body: Bytes) -> Result<(), TransportError> {
        let mut framed = self.framed.take().ok_or(TransportError::Closed)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::Closed)?;
        let identity = self.identity.clone();
        runtime.spawn(async move {
            if let Err(e) = framed.send(body).await {
                tracing::debug!(worker_id = %identity, error = %e, "Detached send failed");
                return;
            }
            let _ = SinkExt::<Bytes>::close(&mut framed).await;
        });
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        if let Some(framed) = self.framed.take() {
            self.shut_down(framed).await;
        }
        self.open().await
    }
}
