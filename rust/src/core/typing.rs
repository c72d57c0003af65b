// Typing presence: the receiving-side TTL set and the publishing-side debounce.
//
// Both sides own their timers as abort handles. The actor spawns the sleeps
// and hands the handles over; every timer carries a generation so a sleep
// that fires after being replaced is recognized as stale.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

pub(crate) const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) struct TypingEntry {
    pub user_id: String,
    pub inserted_at: Instant,
    refreshed_at: Instant,
    generation: u64,
    timer: Option<AbortHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PresenceChange {
    /// Entry created or refreshed; arm an expiry timer for this generation.
    Armed { generation: u64 },
    Removed,
    Unchanged,
}

/// Other participants currently typing in one conversation.
#[derive(Debug)]
pub(crate) struct TypingTracker {
    ttl: Duration,
    entries: HashMap<String, TypingEntry>,
    next_generation: u64,
}

impl TypingTracker {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            next_generation: 0,
        }
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn observe(
        &mut self,
        user_id: &str,
        is_typing: bool,
        viewer_id: &str,
        now: Instant,
    ) -> PresenceChange {
        if user_id == viewer_id {
            return PresenceChange::Unchanged;
        }
        if !is_typing {
            return if self.clear_user(user_id) {
                PresenceChange::Removed
            } else {
                PresenceChange::Unchanged
            };
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let entry = self
            .entries
            .entry(user_id.to_string())
            .or_insert_with(|| TypingEntry {
                user_id: user_id.to_string(),
                inserted_at: now,
                refreshed_at: now,
                generation,
                timer: None,
            });
        entry.refreshed_at = now;
        entry.generation = generation;
        if let Some(old) = entry.timer.take() {
            old.abort();
        }
        PresenceChange::Armed { generation }
    }

    /// Hand over the expiry timer for `generation`. A handle for a superseded
    /// generation is aborted immediately.
    pub(crate) fn attach_timer(&mut self, user_id: &str, generation: u64, handle: AbortHandle) {
        match self.entries.get_mut(user_id) {
            Some(entry) if entry.generation == generation => {
                if let Some(old) = entry.timer.replace(handle) {
                    old.abort();
                }
            }
            _ => handle.abort(),
        }
    }

    /// Expiry timer fired. Only the current generation removes the entry.
    pub(crate) fn expire(&mut self, user_id: &str, generation: u64) -> bool {
        let current = self
            .entries
            .get(user_id)
            .map(|e| e.generation == generation)
            .unwrap_or(false);
        if current {
            self.entries.remove(user_id);
        }
        current
    }

    pub(crate) fn clear_user(&mut self, user_id: &str) -> bool {
        match self.entries.remove(user_id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Entries still within their TTL at `now`, oldest first.
    pub(crate) fn active(&self, now: Instant) -> Vec<&TypingEntry> {
        let mut live: Vec<&TypingEntry> = self
            .entries
            .values()
            .filter(|e| now < e.refreshed_at + self.ttl)
            .collect();
        live.sort_by(|a, b| {
            a.inserted_at
                .cmp(&b.inserted_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        live
    }

    /// Cancel every timer and forget every entry.
    pub(crate) fn dispose(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Keystroke {
    /// Publish `is_typing = true` (first keystroke of a burst).
    pub publish_start: bool,
    /// Arm an idle timer for this generation.
    pub generation: u64,
}

/// Publishing side: one `true` per typing burst, `false` after the idle
/// delay without keystrokes.
#[derive(Debug)]
pub(crate) struct TypingDebounce {
    idle: Duration,
    active: bool,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl TypingDebounce {
    pub(crate) fn new(idle: Duration) -> Self {
        Self {
            idle,
            active: false,
            generation: 0,
            timer: None,
        }
    }

    pub(crate) fn idle(&self) -> Duration {
        self.idle
    }

    pub(crate) fn keystroke(&mut self) -> Keystroke {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        let publish_start = !self.active;
        self.active = true;
        Keystroke {
            publish_start,
            generation: self.generation,
        }
    }

    pub(crate) fn attach_timer(&mut self, generation: u64, handle: AbortHandle) {
        if generation != self.generation || !self.active {
            handle.abort();
            return;
        }
        if let Some(old) = self.timer.replace(handle) {
            old.abort();
        }
    }

    /// Idle timer fired; returns whether `false` should be published.
    pub(crate) fn idle_elapsed(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.active {
            return false;
        }
        self.active = false;
        self.timer = None;
        true
    }

    /// Explicit stop (message sent, input cleared, teardown). Returns whether
    /// `false` should be published.
    pub(crate) fn stop(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        std::mem::replace(&mut self.active, false)
    }
}
