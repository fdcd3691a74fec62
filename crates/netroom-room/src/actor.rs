//! The room actor: one tokio task per room driving [`Room::tick`].
//!
//! The task owns its [`Room`] outright. Everything else talks to it through
//! a [`RoomHandle`]: control commands over an mpsc channel with oneshot
//! replies, and the latest [`RoomBasicInfo`] through a watch channel that
//! readers can borrow without waiting on the tick loop.

use netroom_protocol::messages::RoomId;
use netroom_tick::{TickClock, TickInfo};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::lobby::RoomBasicInfo;
use crate::observer::TickVerdict;
use crate::{EngineConfig, Room, RoomError};

/// Control messages accepted by a room actor.
#[derive(Debug)]
pub(crate) enum RoomCommand {
    Info {
        reply: oneshot::Sender<RoomBasicInfo>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to a running room.
///
/// The room stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
    info: watch::Receiver<RoomBasicInfo>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Info published after the room's last tick.
    pub fn info(&self) -> RoomBasicInfo {
        self.info.borrow().clone()
    }

    /// Asks the actor for its info between ticks.
    pub async fn fetch_info(&self) -> Result<RoomBasicInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Info { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Stops the room and waits until it has released its clients.
    pub async fn stop(&self) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Stop { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Waits until the room reports `Stopped` or its actor is gone.
    pub async fn stopped(&self) {
        let mut info = self.info.clone();
        while !info.borrow_and_update().state.is_stopped() {
            if info.changed().await.is_err() {
                return;
            }
        }
    }

    /// Returns `true` once the actor task has exited.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct RoomActor {
    room: Room,
    clock: TickClock,
    receiver: mpsc::Receiver<RoomCommand>,
    info: watch::Sender<RoomBasicInfo>,
}

enum Wake {
    Command(Option<RoomCommand>),
    Tick(TickInfo),
}

impl RoomActor {
    async fn run(mut self) {
        self.room.start();
        self.publish();
        info!(
            room_id = %self.room.id(),
            tick_rate_hz = self.clock.tick_rate_hz(),
            "room actor started"
        );

        loop {
            let wake = tokio::select! {
                command = self.receiver.recv() => Wake::Command(command),
                tick = self.clock.next_tick() => Wake::Tick(tick),
            };

            match wake {
                Wake::Command(Some(RoomCommand::Info { reply })) => {
                    let _ = reply.send(self.room.basic_info());
                }
                Wake::Command(Some(RoomCommand::Stop { reply })) => {
                    self.room.stop();
                    self.publish();
                    let _ = reply.send(());
                    break;
                }
                Wake::Command(None) => {
                    debug!(room_id = %self.room.id(), "all handles dropped");
                    self.room.stop();
                    break;
                }
                Wake::Tick(tick) => {
                    let verdict = self.room.tick(tick.server_time);
                    self.clock.record_tick_end();
                    self.publish();
                    if verdict == TickVerdict::Stop {
                        break;
                    }
                }
            }
        }

        self.publish();
        info!(
            room_id = %self.room.id(),
            ticks = self.clock.tick_count(),
            "room actor stopped"
        );
    }

    fn publish(&self) {
        let latest = self.room.basic_info();
        self.info.send_if_modified(|current| {
            if *current == latest {
                return false;
            }
            *current = latest;
            true
        });
    }
}

/// Spawns the actor task for `room` and returns a handle to it.
pub fn spawn_room(room: Room, engine: &EngineConfig) -> (RoomHandle, JoinHandle<()>) {
    let room_id = room.id();
    let (tx, rx) = mpsc::channel(engine.command_channel_size.max(1));
    let (info_tx, info_rx) = watch::channel(room.basic_info());

    let actor = RoomActor {
        room,
        clock: TickClock::new(engine.tick_config()),
        receiver: rx,
        info: info_tx,
    };
    let task = tokio::spawn(actor.run());

    let handle = RoomHandle {
        room_id,
        sender: tx,
        info: info_rx,
    };
    (handle, task)
}
