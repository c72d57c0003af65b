// Per-conversation message set: the single source of truth that grouping
// projects from. Keyed by message id, kept ascending by `created_at`.

use std::collections::HashSet;

use crate::state::{Message, MessageStatus};

#[derive(Debug, Clone, Default)]
pub(crate) struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Message> {
        if !self.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    /// Insert a message at its `created_at` position. Returns `false` (and
    /// leaves the existing record untouched) if the id is already present.
    pub(crate) fn insert(&mut self, msg: Message) -> bool {
        if self.ids.contains(&msg.id) {
            return false;
        }
        // Ties keep arrival order.
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.ids.insert(msg.id.clone());
        self.messages.insert(pos, msg);
        true
    }

    /// Upsert a fetched page. Known ids keep their local record and only
    /// pick up forward status moves; returns the number of messages added.
    pub(crate) fn merge_page(&mut self, page: Vec<Message>) -> usize {
        let mut added = 0;
        for mut msg in page {
            if self.contains(&msg.id) {
                self.advance_status(&msg.id, msg.status);
                continue;
            }
            msg.local_id = None;
            if self.insert(msg) {
                added += 1;
            }
        }
        added
    }

    pub(crate) fn set_attachment_path(&mut self, id: &str, storage_path: &str) {
        if let Some(att) = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .and_then(|m| m.attachment.as_mut())
        {
            att.storage_path = storage_path.to_string();
        }
    }

    /// Move a message's status forward. Backwards or out-of-machine moves
    /// (e.g. `seen -> delivered`, anything out of `failed`) are ignored.
    pub(crate) fn advance_status(&mut self, id: &str, next: MessageStatus) -> bool {
        if !self.contains(id) {
            return false;
        }
        let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if !msg.status.can_advance_to(next) {
            return false;
        }
        msg.status = next;
        if next.is_confirmed() {
            msg.local_id = None;
        }
        true
    }

    /// Locate the provisional record by its local id and move it forward.
    /// Returns the durable id when found.
    pub(crate) fn advance_local(&mut self, local_id: &str, next: MessageStatus) -> Option<String> {
        let msg = self
            .messages
            .iter_mut()
            .find(|m| m.local_id.as_deref() == Some(local_id))?;
        let id = msg.id.clone();
        if msg.status.can_advance_to(next) {
            msg.status = next;
            if next.is_confirmed() {
                msg.local_id = None;
            }
        }
        Some(id)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Message> {
        if !self.ids.remove(id) {
            return None;
        }
        let pos = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(pos))
    }

    /// The maximum-`created_at` message. Later position wins ties.
    pub(crate) fn latest(&self) -> Option<&Message> {
        self.messages.iter().max_by_key(|m| m.created_at)
    }

    pub(crate) fn has_unseen_from_others(&self, viewer_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.sender_id != viewer_id && m.status != MessageStatus::Seen)
    }
}
