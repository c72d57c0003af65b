use crate::state::{MessageKind, ViewerContext};

/// File picked by the user, uploaded before the durable message write.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub duration_ms: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl std::fmt::Debug for OutgoingAttachment {
    // Keep payload bytes out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingAttachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum AppAction {
    // Session
    SignIn {
        viewer: ViewerContext,
    },
    SignOut,

    // Full-history thread
    OpenConversation {
        conversation_id: String,
    },
    CloseConversation {
        conversation_id: String,
    },
    ReloadConversation {
        conversation_id: String,
    },
    LoadOlderMessages {
        conversation_id: String,
    },

    // Updates-only summaries
    WatchConversation {
        conversation_id: String,
    },
    UnwatchConversation {
        conversation_id: String,
    },

    // Sending
    SendMessage {
        conversation_id: String,
        content: String,
        kind: MessageKind,
        attachment: Option<OutgoingAttachment>,
    },
    ResendMessage {
        conversation_id: String,
        message_id: String,
    },
    DiscardMessage {
        conversation_id: String,
        message_id: String,
    },

    // Presence
    SetTyping {
        conversation_id: String,
        is_typing: bool,
    },

    // Media
    ResolveAttachmentUrl {
        storage_path: String,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
    Teardown,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies or file bytes).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::SignIn { .. } => "SignIn",
            AppAction::SignOut => "SignOut",

            // Full-history thread
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation { .. } => "CloseConversation",
            AppAction::ReloadConversation { .. } => "ReloadConversation",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",

            // Updates-only summaries
            AppAction::WatchConversation { .. } => "WatchConversation",
            AppAction::UnwatchConversation { .. } => "UnwatchConversation",

            // Sending
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::ResendMessage { .. } => "ResendMessage",
            AppAction::DiscardMessage { .. } => "DiscardMessage",

            // Presence
            AppAction::SetTyping { .. } => "SetTyping",

            // Media
            AppAction::ResolveAttachmentUrl { .. } => "ResolveAttachmentUrl",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
            AppAction::Teardown => "Teardown",
        }
    }
}
