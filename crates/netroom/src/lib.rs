//! # netroom
//!
//! Authoritative multiplayer room server core.
//!
//! A [`Lobby`](room::Lobby) creates rooms. Each room runs its own actor
//! task on a fixed-rate tick, owns every client, entity and scene inside
//! it, and talks to clients through a [`TransportContext`](transport::TransportContext)
//! using the binary envelope protocol from [`protocol`].
//!
//! ```text
//! transport (bytes) → protocol (envelopes) → room (state)
//!                                              ↑
//!                                 lobby ───────┘ (create / query / stop)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netroom::prelude::*;
//!
//! # async fn run() -> Result<(), NetroomError> {
//! let config = ServerConfig::from_json(
//!     r#"{"apps":[{"id":"arena","versions":["1.0"],"max_rooms":4}]}"#,
//! )?;
//! netroom::logging::init(&config.log_filter);
//!
//! let lobby = config.lobby();
//! let (transport, _hub) = LocalTransport::pair();
//! let handle = lobby.open("arena", "1.0", RoomOptions::default(), Box::new(transport))?;
//! handle.stopped().await;
//! # Ok(())
//! # }
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod config;
mod error;
pub mod logging;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::ServerConfig;
pub use error::NetroomError;

pub use netroom_protocol as protocol;
pub use netroom_room as room;
pub use netroom_tick as tick;
pub use netroom_transport as transport;

/// The types most servers need, in one import.
pub mod prelude {
    pub use crate::{NetroomError, ServerConfig};

    pub use netroom_protocol::messages::{self, EntityId, RoomId, codes};
    pub use netroom_protocol::{
        EnvelopeRef, PoolConfig, Registry, SerdeError, StreamPool, TypeCodeTable, WireCodec,
        WireEnvelope,
    };
    pub use netroom_room::{
        AppConfig, EngineConfig, HandlerTable, IdleWatchdog, Lobby, LobbyError, MigrationPolicy,
        Room, RoomBasicInfo, RoomError, RoomHandle, RoomOptions, RoomState, TickObserver,
        TickVerdict, spawn_room,
    };
    pub use netroom_tick::{TickClock, TickConfig, TickPolicy};
    pub use netroom_transport::{
        ClientId, DeliveryMode, DisconnectCode, LocalHub, LocalOutbound, LocalTransport,
        TransportContext, TransportError, TransportEvent,
    };
}
