use std::time::Duration;

use shared::domain::{RoomId, UserId};
use shared::protocol::TypingUser;

/// Inbound entries expire after this much silence without a fresh
/// typing-start for the same user.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(6);

/// Outbound debounce window: a burst of keystrokes inside it collapses into
/// a single start signal, with the stop emitted once the window elapses.
pub const TYPING_IDLE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct RosterEntry {
    user: TypingUser,
    generation: u64,
}

/// Users currently typing in the active room. Each entry carries a
/// generation so a stale expiry timer cannot evict a user who started
/// typing again in the meantime.
#[derive(Debug, Default)]
pub struct TypingRoster {
    entries: Vec<RosterEntry>,
    next_generation: u64,
}

impl TypingRoster {
    /// Records a typing-start. Idempotent on membership; always refreshes
    /// the generation. Returns the new generation and whether the user was
    /// newly added.
    pub fn note_start(&mut self, user: TypingUser) -> (u64, bool) {
        self.next_generation += 1;
        let generation = self.next_generation;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.user.user_id == user.user_id)
        {
            entry.generation = generation;
            entry.user = user;
            (generation, false)
        } else {
            self.entries.push(RosterEntry { user, generation });
            (generation, true)
        }
    }

    /// Records a typing-stop. Idempotent; absent users are not an error.
    pub fn note_stop(&mut self, user_id: UserId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.user.user_id != user_id);
        self.entries.len() != before
    }

    /// Expiry-timer callback: removes the entry only if no fresher start
    /// has been recorded since `generation` was handed out.
    pub fn expire(&mut self, user_id: UserId, generation: u64) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.user.user_id == user_id && e.generation == generation)
        else {
            return false;
        };
        self.entries.remove(pos);
        true
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.entries.iter().any(|e| e.user.user_id == user_id)
    }

    pub fn users(&self) -> Vec<TypingUser> {
        self.entries.iter().map(|e| e.user.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyPress {
    /// True when this press opens a new burst and a start signal must go
    /// out; false while the burst is still live.
    pub emit_start: bool,
    /// Hand this to the idle timer; `idle_elapsed` only fires the stop when
    /// it is still the newest press.
    pub generation: u64,
}

/// Debounce state for the local user's outbound typing signal. Pure state
/// machine; the client owns the actual timers.
#[derive(Debug, Default)]
pub struct TypingDebouncer {
    active_room: Option<RoomId>,
    generation: u64,
}

impl TypingDebouncer {
    pub fn key_pressed(&mut self, room_id: RoomId) -> KeyPress {
        self.generation += 1;
        let emit_start = self.active_room != Some(room_id);
        self.active_room = Some(room_id);
        KeyPress {
            emit_start,
            generation: self.generation,
        }
    }

    /// Idle timer fired. Returns the room to emit a stop for, unless a
    /// later keystroke re-armed the window or the burst was cancelled.
    pub fn idle_elapsed(&mut self, generation: u64) -> Option<RoomId> {
        if self.generation != generation {
            return None;
        }
        self.active_room.take()
    }

    /// Consumer-initiated stop. Returns true when a stop signal should be
    /// emitted now; the pending idle timer is invalidated either way.
    pub fn explicit_stop(&mut self, room_id: RoomId) -> bool {
        self.generation += 1;
        if self.active_room == Some(room_id) {
            self.active_room = None;
            true
        } else {
            false
        }
    }

    /// Cancels any pending stop without emitting it (room switch or
    /// disconnect).
    pub fn reset(&mut self) {
        self.generation += 1;
        self.active_room = None;
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
