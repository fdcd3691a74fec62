//! Error types for the room layer.

use netroom_protocol::SerdeError;
use netroom_protocol::messages::RoomId;
use netroom_transport::{ClientId, DisconnectCode, TransportError};

/// Why a room refused an operation.
///
/// Request handlers return these to the dispatcher, which logs them and
/// drops the request. Nothing is mutated or broadcast for a rejected
/// request.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The client lacks the authority the request needs (master or owner).
    #[error("{client} is not allowed to {action}")]
    Unauthorized {
        client: ClientId,
        action: &'static str,
    },

    /// The request names a client, entity or scene the room doesn't have.
    #[error("{0} not found")]
    NotFound(String),

    /// The room or the target is in a state that doesn't allow this.
    #[error("invalid room state for this operation: {0}")]
    InvalidState(String),

    /// Registration refused: every slot is taken.
    #[error("{0} is at capacity")]
    CapacityExceeded(RoomId),

    /// Registration refused: the password did not match.
    #[error("wrong password for {0}")]
    WrongPassword(RoomId),

    #[error(transparent)]
    Serde(#[from] SerdeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The room's control channel is full or closed.
    #[error("{0} is unavailable")]
    Unavailable(RoomId),
}

impl RoomError {
    /// Disconnect code for errors that also end the connection.
    pub fn disconnect_code(&self) -> Option<DisconnectCode> {
        match self {
            Self::WrongPassword(_) => Some(DisconnectCode::WrongPassword),
            Self::CapacityExceeded(_) => Some(DisconnectCode::CapacityExceeded),
            _ => None,
        }
    }
}

/// Errors from lobby operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The application is unknown or doesn't list this version.
    #[error("app {app} has no version {version}")]
    UnknownVersion { app: String, version: String },

    /// The application already has as many rooms as it may.
    #[error("app {app} reached its limit of {max} rooms")]
    RoomLimit { app: String, max: usize },

    #[error("{0} not found")]
    NotFound(RoomId),

    #[error("invalid room options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Room(#[from] RoomError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_errors_carry_disconnect_codes() {
        assert_eq!(
            RoomError::WrongPassword(RoomId(1)).disconnect_code(),
            Some(DisconnectCode::WrongPassword)
        );
        assert_eq!(
            RoomError::CapacityExceeded(RoomId(1)).disconnect_code(),
            Some(DisconnectCode::CapacityExceeded)
        );
        assert_eq!(RoomError::NotFound("entity-1".into()).disconnect_code(), None);
    }

    #[test]
    fn test_error_messages() {
        let err = RoomError::Unauthorized {
            client: ClientId::new(3),
            action: "load scenes",
        };
        assert_eq!(err.to_string(), "client-3 is not allowed to load scenes");
        assert_eq!(RoomError::Unavailable(RoomId(2)).to_string(), "room-2 is unavailable");
        let err: RoomError = SerdeError::UnknownTypeCode(7).into();
        assert!(matches!(err, RoomError::Serde(_)));
    }
}
