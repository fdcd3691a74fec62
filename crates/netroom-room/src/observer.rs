//! End-of-tick hooks that can decide to stop a room.

use std::time::Duration;

use tracing::info;

use crate::Room;

/// What an observer wants after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    Continue,
    Stop,
}

/// Runs after every tick, once the send queue has been flushed.
///
/// Any observer returning [`TickVerdict::Stop`] stops the room.
pub trait TickObserver: Send {
    fn on_tick(&mut self, room: &Room, now: Duration) -> TickVerdict;
}

impl<F> TickObserver for F
where
    F: FnMut(&Room, Duration) -> TickVerdict + Send,
{
    fn on_tick(&mut self, room: &Room, now: Duration) -> TickVerdict {
        self(room, now)
    }
}

/// Stops a room that has had no connections for `grace`.
#[derive(Debug, Clone)]
pub struct IdleWatchdog {
    grace: Duration,
    empty_since: Option<Duration>,
}

impl IdleWatchdog {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            empty_since: None,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

impl TickObserver for IdleWatchdog {
    fn on_tick(&mut self, room: &Room, now: Duration) -> TickVerdict {
        if room.occupancy() > 0 {
            self.empty_since = None;
            return TickVerdict::Continue;
        }
        let since = *self.empty_since.get_or_insert(now);
        if now.saturating_sub(since) >= self.grace {
            info!(room_id = %room.id(), idle = ?now.saturating_sub(since), "room idle, stopping");
            TickVerdict::Stop
        } else {
            TickVerdict::Continue
        }
    }
}
