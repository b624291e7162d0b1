use shared::domain::{MessageId, UserId};
use shared::protocol::MessagePayload;

/// History pages are requested with this limit unless the caller overrides
/// it; a returned page of exactly this length signals more older history.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// The ordered, deduplicated message list for the active room.
///
/// Two independent delivery channels feed it: the REST history pager
/// (reverse-chronological pages pulled on demand) and the live socket stream
/// (chronological pushes). The two can overlap at the boundary, so every
/// merge runs the dedup-by-id check unconditionally; timestamps only decide
/// placement.
#[derive(Debug, Clone)]
pub struct RoomTimeline {
    messages: Vec<MessagePayload>,
    has_more: bool,
}

impl Default for RoomTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomTimeline {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            has_more: true,
        }
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether an older history page may still exist on the server.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Pagination cursor: the id of the oldest message currently held.
    pub fn oldest_id(&self) -> Option<MessageId> {
        self.messages.first().map(|m| m.message_id)
    }

    /// Empties the list and re-arms pagination. Used on room switch,
    /// disconnect, and unexpected connection drop.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.has_more = true;
    }

    /// Merges one live-pushed message. Duplicate ids are no-ops; new
    /// messages land at their timestamp-sorted position, which for a
    /// chronological live stream is the tail.
    pub fn merge_live(&mut self, message: MessagePayload) -> bool {
        if self.contains(message.message_id) {
            return false;
        }
        self.insert_sorted(message);
        true
    }

    /// Merges a reverse-chronological history page (initial load and
    /// load-older are the same operation). Every page entry is strictly
    /// older than anything already held except for boundary overlap, which
    /// dedup absorbs; existing entries are never moved. Recomputes
    /// `has_more` from the returned page length and reports how many
    /// entries were added.
    pub fn ingest_page(&mut self, page_newest_first: Vec<MessagePayload>, page_size: u32) -> usize {
        self.has_more = page_newest_first.len() as u32 == page_size;
        let mut added = 0;
        for message in page_newest_first.into_iter().rev() {
            if self.contains(message.message_id) {
                continue;
            }
            self.insert_sorted(message);
            added += 1;
        }
        added
    }

    /// Adds `reader` to a held message's read-receipt list. The only local
    /// mutation of a message this subsystem permits.
    pub fn mark_read(&mut self, message_id: MessageId, reader: UserId) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
        else {
            return false;
        };
        if message.read_by.contains(&reader) {
            return false;
        }
        message.read_by.push(reader);
        true
    }

    fn contains(&self, message_id: MessageId) -> bool {
        self.messages.iter().any(|m| m.message_id == message_id)
    }

    fn insert_sorted(&mut self, message: MessagePayload) {
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(pos, message);
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
