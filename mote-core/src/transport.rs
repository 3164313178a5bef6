//! Transport: split logical messages into frames, reassemble per (sender, message id).

use std::collections::HashMap;

use tracing::trace;

use crate::wire::{self, Frame, FrameEncodeError, PAYLOAD_CAPACITY};
use crate::Millis;

/// Link-layer sender identifier (the radio's serial number).
pub type SenderId = u32;

/// The total field is one byte.
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;
/// Longest logical message that can be sent.
pub const MAX_MESSAGE_LEN: usize = MAX_FRAGMENTS * PAYLOAD_CAPACITY;

/// Number of frames for a message of `len` bytes. An empty message still takes one frame.
pub fn fragment_count(len: usize) -> usize {
    ((len + PAYLOAD_CAPACITY - 1) / PAYLOAD_CAPACITY).max(1)
}

/// Split a message into frames sharing `message_id`.
pub fn split_into_frames(message_id: u16, bytes: &[u8]) -> Result<Vec<Frame>, FragmentError> {
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(FragmentError::TooLong {
            len: bytes.len(),
            max: MAX_MESSAGE_LEN,
        });
    }
    if bytes.is_empty() {
        return Ok(vec![Frame {
            message_id,
            index: 0,
            total: 1,
            payload: Vec::new(),
        }]);
    }
    let total = fragment_count(bytes.len()) as u8;
    Ok(bytes
        .chunks(PAYLOAD_CAPACITY)
        .enumerate()
        .map(|(i, chunk)| Frame {
            message_id,
            index: i as u8,
            total,
            payload: chunk.to_vec(),
        })
        .collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    TooLong { len: usize, max: usize },
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}

/// Partially received message.
struct Reassembly {
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
    expires_at: Millis,
}

impl Reassembly {
    fn new(total: usize, expires_at: Millis) -> Self {
        Self {
            slots: vec![None; total],
            filled: 0,
            expires_at,
        }
    }
}

/// Reassembly table keyed by (sender, message id). Entries leave on completion or expiry.
pub struct Reassembler {
    pending: HashMap<(SenderId, u16), Reassembly>,
    expiry: Millis,
}

impl Reassembler {
    pub fn new(expiry: Millis) -> Self {
        Self {
            pending: HashMap::new(),
            expiry,
        }
    }

    /// Store one fragment. Returns the whole message when the last missing fragment arrives.
    pub fn on_fragment(&mut self, sender: SenderId, frame: Frame, now: Millis) -> Option<Vec<u8>> {
        if frame.index >= frame.total {
            return None;
        }
        let key = (sender, frame.message_id);
        let total = frame.total as usize;
        let expires_at = now.saturating_add(self.expiry);
        let state = self
            .pending
            .entry(key)
            .or_insert_with(|| Reassembly::new(total, expires_at));
        if state.slots.len() != total {
            // Message id reused (wraparound) before the old state expired.
            trace!(sender, message_id = frame.message_id, "fragment total changed, restarting");
            *state = Reassembly::new(total, expires_at);
        }
        let slot = &mut state.slots[frame.index as usize];
        if slot.is_none() {
            state.filled += 1;
        }
        *slot = Some(frame.payload);
        if state.filled < total {
            return None;
        }
        let done = self.pending.remove(&key)?;
        Some(done.slots.into_iter().flatten().flatten().collect())
    }

    /// Drop every incomplete message whose window has elapsed. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Millis) -> usize {
        let before = self.pending.len();
        self.pending.retain(|&(sender, message_id), state| {
            let keep = state.expires_at > now;
            if !keep {
                trace!(sender, message_id, filled = state.filled, "reassembly expired");
            }
            keep
        });
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Fragmenting sender plus reassembling receiver.
pub struct Transport {
    next_message_id: u16,
    reassembler: Reassembler,
}

impl Transport {
    pub fn new(first_message_id: u16, reassembly_expiry: Millis) -> Self {
        Self {
            next_message_id: first_message_id,
            reassembler: Reassembler::new(reassembly_expiry),
        }
    }

    /// Encode `bytes` into wire frames under a fresh message id.
    pub fn send(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FragmentError> {
        let frames = split_into_frames(self.next_message_id, bytes)?;
        let encoded = frames
            .iter()
            .map(wire::encode_frame)
            .collect::<Result<Vec<_>, _>>()?;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        Ok(encoded)
    }

    /// Feed one received frame. Undecodable frames are dropped.
    pub fn on_frame(&mut self, sender: SenderId, bytes: &[u8], now: Millis) -> Option<Vec<u8>> {
        match wire::decode_frame(bytes) {
            Ok(frame) => self.reassembler.on_fragment(sender, frame, now),
            Err(e) => {
                trace!(sender, error = %e, "dropping frame");
                None
            }
        }
    }

    pub fn purge_expired(&mut self, now: Millis) -> usize {
        self.reassembler.purge_expired(now)
    }

    /// Message id the next `send` will use.
    pub fn next_message_id(&self) -> u16 {
        self.next_message_id
    }

    /// Incomplete messages currently held.
    pub fn pending_reassemblies(&self) -> usize {
        self.reassembler.len()
    }
}
