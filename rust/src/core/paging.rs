// Backward history cursor + scroll anchoring.

use crate::backend::PageRequest;

pub(crate) const DEFAULT_PAGE_SIZE: usize = 30;

/// Backward cursor into a conversation's history.
///
/// `token` is `None` before the first fetch; after each fetch it holds the
/// server cursor of the oldest loaded message. A fresh cursor is created
/// whenever the conversation identity changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PaginationCursor {
    token: Option<String>,
    has_more: bool,
    loaded_initial: bool,
    in_flight: bool,
    // Set when the cursor moved while an older fetch was out; that fetch's
    // cursor points above the gap.
    stale_older: bool,
}

impl PaginationCursor {
    pub(crate) fn new() -> Self {
        Self {
            token: None,
            has_more: false,
            loaded_initial: false,
            in_flight: false,
            stale_older: false,
        }
    }

    pub(crate) fn has_more(&self) -> bool {
        self.has_more
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) fn loaded_initial(&self) -> bool {
        self.loaded_initial
    }

    pub(crate) fn initial_request(&mut self, conversation_id: &str, limit: usize) -> PageRequest {
        self.in_flight = true;
        PageRequest {
            conversation_id: conversation_id.to_string(),
            cursor: None,
            limit,
            initial: true,
        }
    }

    /// Next backward request, or `None` if nothing more can be fetched right
    /// now (initial page not loaded, history exhausted, or a fetch in flight).
    pub(crate) fn older_request(
        &mut self,
        conversation_id: &str,
        limit: usize,
    ) -> Option<PageRequest> {
        if !self.loaded_initial || !self.has_more || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            conversation_id: conversation_id.to_string(),
            cursor: self.token.clone(),
            limit,
            initial: false,
        })
    }

    /// Record a completed fetch. `has_more` follows the returned cursor.
    pub(crate) fn advance(&mut self, initial: bool, next_cursor: Option<String>) {
        self.in_flight = false;
        if initial {
            self.loaded_initial = true;
        } else if std::mem::take(&mut self.stale_older) {
            return;
        }
        self.has_more = next_cursor.is_some();
        self.token = next_cursor;
    }

    pub(crate) fn fetch_failed(&mut self) {
        self.in_flight = false;
        self.stale_older = false;
    }

    /// A refetched latest page did not reach the loaded history: continue
    /// backwards from that page so the messages in between stay reachable.
    pub(crate) fn rewind(&mut self, next_cursor: String) {
        self.stale_older = self.in_flight;
        self.token = Some(next_cursor);
        self.has_more = true;
    }
}

/// Scroll position captured before prepending older history.
///
/// Naively prepending a page makes the viewport jump by the height of the new
/// content. Capture before `load_more`, then restore once the new content has
/// been laid out (the view's `anchor_epoch` changes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub scroll_height: f64,
    pub scroll_top: f64,
}

impl ScrollAnchor {
    pub fn capture(scroll_height: f64, scroll_top: f64) -> Self {
        Self {
            scroll_height,
            scroll_top,
        }
    }

    /// Scroll offset that keeps the previously visible content in place.
    pub fn restore(&self, new_scroll_height: f64) -> f64 {
        let delta = new_scroll_height - self.scroll_height;
        (self.scroll_top + delta).max(0.0)
    }
}
