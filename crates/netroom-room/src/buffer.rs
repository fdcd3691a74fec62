//! Replay buffer and per-client send queue.

use std::collections::BTreeMap;

use netroom_protocol::{StreamPool, WireEnvelope, encode_batch};
use netroom_transport::{ClientId, DeliveryMode, TransportContext};

// ---------------------------------------------------------------------------
// MessageBuffer
// ---------------------------------------------------------------------------

/// Handle to one buffered message. Tokens grow monotonically, so they also
/// give the replay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferToken(u64);

/// Envelopes replayed verbatim to every newly registered client.
///
/// Whoever pushes a message keeps its token and removes it when the state
/// it describes is destroyed or superseded.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    next: u64,
    entries: BTreeMap<BufferToken, WireEnvelope>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the end of the replay order.
    pub fn push(&mut self, envelope: WireEnvelope) -> BufferToken {
        let token = BufferToken(self.next);
        self.next += 1;
        self.entries.insert(token, envelope);
        token
    }

    pub fn remove(&mut self, token: BufferToken) -> Option<WireEnvelope> {
        self.entries.remove(&token)
    }

    /// Drops `old` (if any) and appends `envelope`.
    pub fn replace(&mut self, old: Option<BufferToken>, envelope: WireEnvelope) -> BufferToken {
        if let Some(old) = old {
            self.entries.remove(&old);
        }
        self.push(envelope)
    }

    pub fn get(&self, token: BufferToken) -> Option<&WireEnvelope> {
        self.entries.get(&token)
    }

    pub fn contains(&self, token: BufferToken) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffered messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &WireEnvelope> {
        self.entries.values()
    }

    /// Copy of the whole buffer for a registration response.
    pub fn snapshot(&self) -> Vec<WireEnvelope> {
        self.entries.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// SendQueue
// ---------------------------------------------------------------------------

/// Outbound envelopes waiting for the end of the tick.
///
/// Each client's envelopes keep their enqueue order and leave as one batch.
#[derive(Debug, Default)]
pub struct SendQueue {
    pending: BTreeMap<ClientId, Vec<WireEnvelope>>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, client: ClientId, envelope: WireEnvelope) {
        self.pending.entry(client).or_default().push(envelope);
    }

    /// Forgets everything queued for a client that is gone.
    pub fn drop_client(&mut self, client: ClientId) -> usize {
        self.pending.remove(&client).map_or(0, |queued| queued.len())
    }

    pub fn pending_for(&self, client: ClientId) -> &[WireEnvelope] {
        self.pending.get(&client).map_or(&[], Vec::as_slice)
    }

    /// Number of clients with something queued.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Sends every client its batch, one transport send per client.
    ///
    /// Returns the number of sends the transport accepted.
    pub fn flush(&mut self, transport: &mut dyn TransportContext, pool: &StreamPool) -> usize {
        let mut sent = 0;
        for (client, envelopes) in std::mem::take(&mut self.pending) {
            let mut writer = pool.writer();
            encode_batch(&mut writer, &envelopes);
            match transport.send(client, writer.as_slice(), DeliveryMode::ReliableOrdered, 0) {
                Ok(()) => sent += 1,
                Err(error) => {
                    tracing::warn!(
                        %client,
                        %error,
                        dropped = envelopes.len(),
                        "failed to flush batch"
                    );
                }
            }
        }
        sent
    }
}
