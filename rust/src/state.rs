use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The acting user. Passed explicitly to every entry point that needs to know
/// "who am I" (send construction, own-echo suppression, typing filters).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerContext {
    pub user_id: String,
    pub display_name: String,
    pub role: SenderRole,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Customer,
    Agent,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub role: SenderRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Audio,
    Image,
    Document,
}

/// Delivery lifecycle of a message.
///
/// `Sending < Delivered < Seen` is a strict forward order. `Failed` is only
/// reachable from `Sending` and never left: a failed message is resubmitted
/// as a brand new message with a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Delivered,
    Seen,
    Failed,
}

impl MessageStatus {
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (Sending, Delivered | Seen | Failed) => true,
            (Delivered, Seen) => true,
            _ => false,
        }
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Seen)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Attachment {
    /// Coarse mime class ("image", "audio", ...) used for bubble rendering.
    pub fn mime_class(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(class, _)| class)
            .unwrap_or(self.mime_type.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Only set while the message is an unconfirmed local send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub kind: MessageKind,
    pub body: String,
    /// Unix millis.
    pub created_at: i64,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageGroup {
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub messages: Vec<Message>,
    /// `created_at` of the first message in the group.
    pub timestamp: i64,
    pub sender_info: Participant,
    pub show_header: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Waiting,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingMember {
    pub user_id: String,
    pub name: Option<String>,
}

/// Render-ready projection of the conversation open in full-history mode.
#[derive(Clone, Debug)]
pub struct ConversationViewState {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub participants: Vec<Participant>,
    pub groups: Vec<MessageGroup>,
    pub last_message: Option<Message>,
    pub has_more: bool,
    pub loading: bool,
    pub loading_older: bool,
    /// Conversation-level failure (initial fetch, subscription setup).
    pub load_error: Option<String>,
    pub typing_members: Vec<TypingMember>,
    /// Bumped every time an older page is prepended so the UI knows to
    /// restore its scroll anchor.
    pub anchor_epoch: u64,
    /// storage path -> signed url
    pub attachment_urls: HashMap<String, String>,
}

impl ConversationViewState {
    pub fn loading(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            status: ConversationStatus::Active,
            participants: vec![],
            groups: vec![],
            last_message: None,
            has_more: false,
            loading: true,
            loading_older: false,
            load_error: None,
            typing_members: vec![],
            anchor_epoch: 0,
            attachment_urls: HashMap::new(),
        }
    }

    pub fn message_count(&self) -> usize {
        self.groups.iter().map(|g| g.messages.len()).sum()
    }

    pub fn find_message(&self, id: &str) -> Option<&Message> {
        self.groups
            .iter()
            .flat_map(|g| g.messages.iter())
            .find(|m| m.id == id)
    }
}

/// Lightweight per-conversation state for inbox lists and badges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub unread_messages: Vec<String>,
    pub unread_count: u32,
    pub last_message: Option<Message>,
    /// Watch is parked while the same conversation is open in full-history mode.
    pub suspended: bool,
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub viewer: Option<ViewerContext>,
    pub current_conversation: Option<ConversationViewState>,
    pub summaries: Vec<ConversationSummary>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            viewer: None,
            current_conversation: None,
            summaries: vec![],
            toast: None,
        }
    }

    pub fn summary(&self, conversation_id: &str) -> Option<&ConversationSummary> {
        self.summaries
            .iter()
            .find(|s| s.conversation_id == conversation_id)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
