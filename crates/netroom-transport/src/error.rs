use crate::ClientId;

/// Errors that can occur at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The client is not (or no longer) connected to this context.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// The context was closed and no longer accepts sends.
    #[error("transport context closed")]
    Closed,
}
