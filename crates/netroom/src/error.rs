//! Unified error type for netroom.

use netroom_protocol::SerdeError;
use netroom_room::{LobbyError, RoomError};
use netroom_transport::TransportError;

/// Top-level error that wraps every sub-crate error.
///
/// The `#[from]` attribute on each variant generates the `From` impls,
/// so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum NetroomError {
    /// Encoding or decoding failed.
    #[error(transparent)]
    Serde(#[from] SerdeError),

    /// The transport refused a send.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A room rejected a request or is gone.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Room creation or lookup failed.
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// A configuration document did not parse.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use netroom_protocol::messages::RoomId;
    use netroom_transport::ClientId;

    #[test]
    fn test_from_serde_error() {
        let err = SerdeError::UnknownTypeCode(999);
        let netroom_err: NetroomError = err.into();
        assert!(matches!(netroom_err, NetroomError::Serde(_)));
        assert!(netroom_err.to_string().contains("999"));
    }

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::UnknownClient(ClientId::new(3));
        let netroom_err: NetroomError = err.into();
        assert!(matches!(netroom_err, NetroomError::Transport(_)));
        assert!(netroom_err.to_string().contains("client-3"));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::Unavailable(RoomId(1));
        let netroom_err: NetroomError = err.into();
        assert!(matches!(netroom_err, NetroomError::Room(_)));
    }

    #[test]
    fn test_from_lobby_error() {
        let err = LobbyError::NotFound(RoomId(2));
        let netroom_err: NetroomError = err.into();
        assert!(matches!(netroom_err, NetroomError::Lobby(_)));
    }

    #[test]
    fn test_from_json_error() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let netroom_err: NetroomError = err.into();
        assert!(netroom_err.to_string().starts_with("invalid configuration"));
    }
}
