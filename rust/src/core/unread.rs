// Unread/seen bookkeeping for the two subscription modes.

use crate::state::{Message, MessageStatus};

/// How a conversation subscription treats incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReadMode {
    /// The thread is on screen: everything unseen is marked seen right away,
    /// no unread counter is kept.
    FullHistory,
    /// Inbox lists and badges: never marks seen, accumulates unread ids.
    UpdatesOnly,
}

impl ReadMode {
    pub(crate) fn tag(self) -> &'static str {
        match self {
            ReadMode::FullHistory => "full_history",
            ReadMode::UpdatesOnly => "updates_only",
        }
    }
}

/// Ids of messages the viewer has not seen yet, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UnreadSet {
    ids: Vec<String>,
}

impl UnreadSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ids(&self) -> &[String] {
        &self.ids
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    pub(crate) fn add(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id.to_string());
        true
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|i| i != id);
        self.ids.len() != before
    }

    /// Reconcile against a freshly fetched page after the stream was
    /// interrupted: foreign unseen messages join the set, seen ones leave it.
    pub(crate) fn reconcile_page(&mut self, page: &[Message], viewer_id: &str) -> bool {
        let mut changed = false;
        for msg in page {
            if msg.sender_id == viewer_id {
                continue;
            }
            changed |= if msg.status == MessageStatus::Seen {
                self.remove(&msg.id)
            } else {
                self.add(&msg.id)
            };
        }
        changed
    }
}
