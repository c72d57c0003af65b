//! Contracts for the external collaborators the engine talks to.
//!
//! The engine never owns durable storage, file storage or the pub/sub
//! transport. Reads, writes, uploads and presence publishes run on blocking
//! workers of the core runtime, so those may block. `subscribe` and
//! `unsubscribe` are called on the actor thread and should return promptly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;

use crate::error::BackendError;
use crate::state::{ConversationStatus, Message, MessageKind, Participant, SenderRole};

/// Durable write issued by the send path. `id` is the client-generated id so
/// the realtime echo of this write can be recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub kind: MessageKind,
    pub body: String,
    pub created_at: i64,
    pub attachment: Option<crate::state::Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation_id: String,
    pub cursor: Option<String>,
    pub limit: usize,
    /// First paint: the backend may seed/order differently than for a
    /// backward scroll.
    pub initial: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    /// Ascending by `created_at`.
    pub messages: Vec<Message>,
    pub participants: Vec<Participant>,
    pub next_cursor: Option<String>,
    pub status: Option<ConversationStatus>,
}

pub trait DurableStore: Send + Sync + 'static {
    fn create_message(&self, record: NewMessageRecord) -> Result<(), BackendError>;

    /// Mark every message in the conversation not sent by `viewer_id` and not
    /// already `seen` as seen.
    fn mark_seen(&self, conversation_id: &str, viewer_id: &str) -> Result<(), BackendError>;

    fn fetch_page(&self, request: PageRequest) -> Result<Page, BackendError>;
}

pub trait ObjectStorage: Send + Sync + 'static {
    /// Returns the stored path.
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, BackendError>;

    fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, BackendError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages { conversation_id: String },
    Presence { conversation_id: String },
}

impl Topic {
    pub fn messages(conversation_id: &str) -> Self {
        Topic::Messages {
            conversation_id: conversation_id.to_string(),
        }
    }

    pub fn presence(conversation_id: &str) -> Self {
        Topic::Presence {
            conversation_id: conversation_id.to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Messages { conversation_id } => write!(f, "messages:{conversation_id}"),
            Topic::Presence { conversation_id } => write!(f, "presence:{conversation_id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Insert(Message),
    Update(Message),
    Presence { user_id: String, is_typing: bool },
    /// The stream lost its connection; events may be missed until `Reconnected`.
    Disconnected,
    Reconnected,
}

impl TransportEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            TransportEvent::Insert(_) => "insert",
            TransportEvent::Update(_) => "update",
            TransportEvent::Presence { .. } => "presence",
            TransportEvent::Disconnected => "disconnected",
            TransportEvent::Reconnected => "reconnected",
        }
    }
}

/// A live, typed event stream for one topic.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: Receiver<TransportEvent>,
}

pub trait Transport: Send + Sync + 'static {
    fn subscribe(&self, topic: &Topic) -> Result<Subscription, BackendError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);

    fn publish_presence(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_typing: bool,
    ) -> Result<(), BackendError>;
}

/// The three collaborators the core is constructed with.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DurableStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub transport: Arc<dyn Transport>,
}

impl Backends {
    pub fn new(
        store: Arc<dyn DurableStore>,
        storage: Arc<dyn ObjectStorage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            storage,
            transport,
        }
    }
}
