// Signed download urls for attachment messages.

use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::updates::{CoreMsg, InternalEvent};

use super::AppCore;

// Refresh a little before the backend stops honoring the url.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub(super) struct CachedUrl {
    pub url: String,
    expires_at: Instant,
}

impl CachedUrl {
    pub(super) fn new(url: String, ttl: Duration, now: Instant) -> Self {
        Self {
            url,
            expires_at: now + ttl - EXPIRY_MARGIN.min(ttl / 10),
        }
    }

    pub(super) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl AppCore {
    pub(super) fn clear_attachment_urls(&mut self) {
        self.attachment_urls.clear();
        self.pending_urls.clear();
        self.failed_urls.clear();
    }

    /// Explicit request from the UI; also retries a previous failure.
    pub(super) fn resolve_attachment_url(&mut self, storage_path: &str) {
        if self.viewer.is_none() {
            self.toast(EngineError::AuthenticationRequired.user_visible_message());
            return;
        }
        self.failed_urls.remove(storage_path);
        let fresh = self
            .attachment_urls
            .get(storage_path)
            .is_some_and(|cached| !cached.is_expired(Instant::now()));
        if !fresh {
            self.spawn_signed_url(storage_path);
        }
    }

    /// Uploaded attachments in the open thread get a url without the UI
    /// asking. Pending sends are skipped: their object may not exist yet.
    pub(super) fn request_missing_attachment_urls(&mut self) {
        let Some(session) = self.current.as_ref() else {
            return;
        };
        let now = Instant::now();
        let missing: Vec<String> = session
            .timeline
            .messages()
            .iter()
            .filter(|m| m.status.is_confirmed())
            .filter_map(|m| m.attachment.as_ref())
            .map(|a| a.storage_path.clone())
            .filter(|path| {
                !self.failed_urls.contains(path)
                    && self
                        .attachment_urls
                        .get(path)
                        .map_or(true, |cached| cached.is_expired(now))
            })
            .collect();
        for path in missing {
            self.spawn_signed_url(&path);
        }
    }

    fn spawn_signed_url(&mut self, storage_path: &str) {
        if !self.pending_urls.insert(storage_path.to_string()) {
            return;
        }
        let storage = self.backends.storage.clone();
        let tx = self.core_sender.clone();
        let ttl = self.config.signed_url_ttl();
        let storage_path = storage_path.to_string();
        self.runtime.spawn_blocking(move || {
            let result = storage
                .signed_url(&storage_path, ttl)
                .map_err(EngineError::from);
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::AttachmentUrlResolved {
                    storage_path,
                    result,
                },
            )));
        });
    }

    pub(super) fn handle_attachment_url_resolved(
        &mut self,
        storage_path: String,
        result: Result<String, EngineError>,
    ) {
        // Cleared by sign-out while in flight.
        if !self.pending_urls.remove(&storage_path) {
            return;
        }
        match result {
            Ok(url) => {
                let cached = CachedUrl::new(url, self.config.signed_url_ttl(), Instant::now());
                self.attachment_urls.insert(storage_path, cached);
                self.emit_current_conversation();
            }
            Err(e) => {
                tracing::warn!(%storage_path, %e, "signed url failed");
                self.failed_urls.insert(storage_path);
            }
        }
    }
}
