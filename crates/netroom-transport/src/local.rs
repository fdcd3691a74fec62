//! In-memory transport built on Tokio unbounded channels.
//!
//! [`LocalTransport::pair`] returns the room-side context and a
//! [`LocalHub`] that plays the role of every remote client at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::{
    ClientId, DeliveryMode, DisconnectCode, TransportContext, TransportError,
    TransportEvent,
};

/// What the room pushed towards the clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOutbound {
    /// Bytes for one client.
    Data {
        client: ClientId,
        bytes: Vec<u8>,
        delivery: DeliveryMode,
        channel: u8,
    },
    /// The room dropped a client.
    Disconnected { client: ClientId, code: DisconnectCode },
    /// The room closed its context.
    Closed,
}

/// Room-side half of an in-memory transport.
pub struct LocalTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<LocalOutbound>,
    connected: HashSet<ClientId>,
    closed: bool,
}

/// Client-side half of an in-memory transport.
///
/// Connects simulated clients, injects their payloads and collects what
/// the room sent back.
pub struct LocalHub {
    inbound: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<LocalOutbound>,
    next_id: Arc<AtomicU64>,
}

impl LocalTransport {
    /// Creates a connected context/hub pair.
    pub fn pair() -> (LocalTransport, LocalHub) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = LocalTransport {
            inbound: in_rx,
            outbound: out_tx,
            connected: HashSet::new(),
            closed: false,
        };
        let hub = LocalHub {
            inbound: in_tx,
            outbound: out_rx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (transport, hub)
    }

    /// Number of clients the context currently considers connected.
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }
}

impl TransportContext for LocalTransport {
    fn poll(&mut self, max: usize) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        while events.len() < max {
            let Ok(event) = self.inbound.try_recv() else {
                break;
            };
            match &event {
                TransportEvent::Connected(id) => {
                    self.connected.insert(*id);
                }
                TransportEvent::Disconnected(id) => {
                    // Already dropped by the room; nothing left to report.
                    if !self.connected.remove(id) {
                        continue;
                    }
                }
                TransportEvent::Message { client, .. } => {
                    if !self.connected.contains(client) {
                        continue;
                    }
                }
            }
            events.push(event);
        }
        events
    }

    fn send(
        &mut self,
        client: ClientId,
        data: &[u8],
        delivery: DeliveryMode,
        channel: u8,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.connected.contains(&client) {
            return Err(TransportError::UnknownClient(client));
        }
        self.outbound
            .send(LocalOutbound::Data {
                client,
                bytes: data.to_vec(),
                delivery,
                channel,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn disconnect(&mut self, client: ClientId, code: DisconnectCode) {
        if self.connected.remove(&client) {
            tracing::debug!(%client, %code, "local transport dropping client");
            let _ = self
                .outbound
                .send(LocalOutbound::Disconnected { client, code });
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.connected.clear();
        self.inbound.close();
        let _ = self.outbound.send(LocalOutbound::Closed);
    }
}

impl LocalHub {
    /// Opens a new simulated connection and returns its id.
    pub fn connect(&self) -> ClientId {
        let id = ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.inbound.send(TransportEvent::Connected(id));
        id
    }

    /// Delivers a reliable payload from `client` on channel 0.
    pub fn send(&self, client: ClientId, payload: Vec<u8>) {
        let _ = self.inbound.send(TransportEvent::Message {
            client,
            payload,
            delivery: DeliveryMode::ReliableOrdered,
            channel: 0,
        });
    }

    /// Simulates the client's connection dropping.
    pub fn disconnect(&self, client: ClientId) {
        let _ = self.inbound.send(TransportEvent::Disconnected(client));
    }

    /// Drains everything the room has sent so far.
    pub fn drain(&mut self) -> Vec<LocalOutbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.outbound.try_recv() {
            out.push(item);
        }
        out
    }

    /// Waits for the next outbound item. Returns `None` once the room side
    /// is gone.
    pub async fn recv(&mut self) -> Option<LocalOutbound> {
        self.outbound.recv().await
    }
}
