//! Transport boundary for netroom.
//!
//! The room engine never touches sockets. It talks to a
//! [`TransportContext`]: something it can poll for inbound events and hand
//! outbound bytes to, once per tick. Concrete byte pipes (WebSocket, UDP
//! libraries, ...) live outside this workspace and implement the trait.
//!
//! [`LocalTransport`] is an in-memory implementation backed by Tokio
//! channels. Tests drive a room through its [`LocalHub`].
//!
//! ```text
//! transport (bytes) → protocol (envelopes) → room (state)
//! ```

mod error;
mod local;

pub use error::TransportError;
pub use local::{LocalHub, LocalOutbound, LocalTransport};

use std::fmt;

/// Opaque identifier for a connected client, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Creates a new `ClientId` from a raw `u64`.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Delivery guarantee requested for a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// Delivered in order, no loss.
    #[default]
    ReliableOrdered,
    /// Delivered, possibly out of order.
    ReliableUnordered,
    /// Only the newest message on the channel is delivered.
    Sequenced,
    /// May be lost or reordered.
    Unreliable,
}

/// Reason code handed to the transport when the server drops a client.
///
/// The numeric values travel to the client through whatever disconnect
/// frame the concrete transport uses, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectCode {
    /// Orderly disconnect.
    Normal = 0,
    /// Registration carried the wrong room password.
    WrongPassword = 1,
    /// The room was at capacity when the client registered.
    CapacityExceeded = 2,
    /// The client sent something the room could not accept at all.
    InvalidRequest = 3,
    /// The room is stopping and dropped every client.
    RoomStopped = 4,
}

impl DisconnectCode {
    /// Returns the wire value of this code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::WrongPassword),
            2 => Some(Self::CapacityExceeded),
            3 => Some(Self::InvalidRequest),
            4 => Some(Self::RoomStopped),
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A client opened a connection. It is not registered with the room yet.
    Connected(ClientId),
    /// A client's connection went away.
    Disconnected(ClientId),
    /// A client delivered a payload.
    Message {
        client: ClientId,
        payload: Vec<u8>,
        delivery: DeliveryMode,
        channel: u8,
    },
}

/// The per-room view of a transport.
///
/// Every method is synchronous and must not block: `poll` drains at most
/// `max` already-received events and `send` only enqueues.
pub trait TransportContext: Send + 'static {
    /// Drains up to `max` pending events, oldest first.
    fn poll(&mut self, max: usize) -> Vec<TransportEvent>;

    /// Hands bytes to the transport for one client.
    fn send(
        &mut self,
        client: ClientId,
        data: &[u8],
        delivery: DeliveryMode,
        channel: u8,
    ) -> Result<(), TransportError>;

    /// Drops a client with a reason code. Unknown clients are ignored.
    fn disconnect(&mut self, client: ClientId, code: DisconnectCode);

    /// Unregisters the context. Later sends fail with [`TransportError::Closed`].
    /// Calling it twice is a no-op.
    fn close(&mut self);
}

impl<T: TransportContext + ?Sized> TransportContext for Box<T> {
    fn poll(&mut self, max: usize) -> Vec<TransportEvent> {
        (**self).poll(max)
    }

    fn send(
        &mut self,
        client: ClientId,
        data: &[u8],
        delivery: DeliveryMode,
        channel: u8,
    ) -> Result<(), TransportError> {
        (**self).send(client, data, delivery, channel)
    }

    fn disconnect(&mut self, client: ClientId, code: DisconnectCode) {
        (**self).disconnect(client, code)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_new_and_into_inner() {
        let id = ClientId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId::new(7).to_string(), "client-7");
    }

    #[test]
    fn test_client_id_orders_by_value() {
        assert!(ClientId::new(1) < ClientId::new(2));
    }

    #[test]
    fn test_disconnect_code_round_trips_through_u8() {
        for code in [
            DisconnectCode::Normal,
            DisconnectCode::WrongPassword,
            DisconnectCode::CapacityExceeded,
            DisconnectCode::InvalidRequest,
            DisconnectCode::RoomStopped,
        ] {
            assert_eq!(DisconnectCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(DisconnectCode::from_u8(200), None);
    }

    #[test]
    fn test_delivery_mode_default_is_reliable_ordered() {
        assert_eq!(DeliveryMode::default(), DeliveryMode::ReliableOrdered);
    }
}
