use crate::actions::AppAction;
use crate::backend::{Page, TransportEvent};
use crate::error::EngineError;
use crate::state::AppState;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    /// A new message from someone else arrived; play a sound / flash a badge.
    NotificationCue {
        rev: u64,
        conversation_id: String,
        message_id: String,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::NotificationCue { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Transport receive path. `token` identifies the session the
    // subscription was opened for; events for torn-down sessions are dropped.
    Transport {
        token: u64,
        event: TransportEvent,
    },

    // Async results
    PageFetched {
        token: u64,
        initial: bool,
        result: Result<Page, EngineError>,
    },
    SendFinished {
        conversation_id: String,
        local_id: String,
        // Ok carries the stored attachment path, if any.
        result: Result<Option<String>, EngineError>,
    },
    MarkSeenFinished {
        conversation_id: String,
        result: Result<(), EngineError>,
    },
    AttachmentUrlResolved {
        storage_path: String,
        result: Result<String, EngineError>,
    },

    // Timers
    TypingExpired {
        token: u64,
        user_id: String,
        generation: u64,
    },
    TypingIdle {
        token: u64,
        generation: u64,
    },
}
