//! Authoritative room engine for netroom.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! clients, entities, scenes and replay buffer, and advances them once per
//! tick of a fixed-rate clock.
//!
//! # Key types
//!
//! - [`Room`]: room state plus the synchronous tick body and request handlers
//! - [`HandlerTable`]: type code → request handler
//! - [`MessageBuffer`]: envelopes replayed to late joiners
//! - [`SendQueue`]: per-client outbound batches, flushed once per tick
//! - [`RoomHandle`] / [`spawn_room`]: the actor around a room
//! - [`Lobby`]: id allocation, creation per app version, listing, reaping
//! - [`RoomState`]: lifecycle state machine

mod actor;
mod buffer;
mod client;
mod config;
mod entity;
mod error;
mod handlers;
mod lobby;
mod observer;
mod room;
mod rpc;
mod scene;
mod syncvar;

pub use actor::{RoomHandle, spawn_room};
pub use buffer::{BufferToken, MessageBuffer, SendQueue};
pub use client::Client;
pub use config::{AppConfig, EngineConfig, MigrationPolicy, RoomOptions, RoomState};
pub use entity::Entity;
pub use error::{LobbyError, RoomError};
pub use handlers::{Handler, HandlerFn, HandlerTable, RequestFn};
pub use lobby::{Lobby, RoomBasicInfo};
pub use observer::{IdleWatchdog, TickObserver, TickVerdict};
pub use room::Room;
pub use rpc::{PendingQuery, QueryTable};
pub use scene::{Scene, SceneTable};
