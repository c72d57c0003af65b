//! In-process implementation of the three backend contracts.
//!
//! Non-persistent; everything is lost when the value is dropped. It plays the
//! remote side in tests and demos: a durable store with cursor paging, an
//! object store with fake signed urls, and a topic broadcaster. Faults and a
//! write gate can be injected to exercise failure and in-flight states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use parking_lot::{Condvar, Mutex, RwLock};
use uuid::Uuid;

use crate::backend::{
    Backends, DurableStore, NewMessageRecord, ObjectStorage, Page, PageRequest, Subscription,
    SubscriptionHandle, Topic, Transport, TransportEvent,
};
use crate::error::BackendError;
use crate::state::{
    now_millis, ConversationStatus, Message, MessageKind, MessageStatus, Participant, SenderRole,
};

/// Everything the engine asked the backend to do, in call order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    /// Ids of successful durable writes.
    pub writes: Vec<String>,
    /// `(conversation_id, viewer_id)`
    pub mark_seen: Vec<(String, String)>,
    pub fetches: Vec<PageRequest>,
    /// `(conversation_id, user_id, is_typing)`
    pub presence: Vec<(String, String, bool)>,
    /// Paths of successful uploads.
    pub uploads: Vec<String>,
}

#[derive(Debug, Default)]
struct ConversationRecord {
    /// Ascending by `(created_at, id)`.
    messages: Vec<Message>,
    participants: Vec<Participant>,
    status: Option<ConversationStatus>,
}

impl ConversationRecord {
    fn insert(&mut self, msg: Message) {
        let key = (msg.created_at, msg.id.clone());
        let pos = self
            .messages
            .partition_point(|m| (m.created_at, m.id.clone()) <= key);
        self.messages.insert(pos, msg);
    }

    fn next_timestamp(&self) -> i64 {
        let last = self.messages.last().map(|m| m.created_at).unwrap_or(0);
        now_millis().max(last + 1)
    }
}

#[derive(Debug, Default)]
struct Faults {
    writes: usize,
    uploads: usize,
    fetches: usize,
    subscribes: usize,
    signed_urls: usize,
}

fn take_fault(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

#[derive(Default)]
struct Inner {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
    objects: RwLock<HashMap<String, Vec<u8>>>,
    subscribers: Mutex<HashMap<u64, (Topic, Sender<TransportEvent>)>>,
    next_handle: AtomicU64,
    faults: Mutex<Faults>,
    writes_held: Mutex<bool>,
    writes_released: Condvar,
    calls: Mutex<CallLog>,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

fn cursor_for(msg: &Message) -> String {
    format!("{}:{}", msg.created_at, msg.id)
}

fn parse_cursor(cursor: &str) -> Result<(i64, String), BackendError> {
    let (ts, id) = cursor
        .split_once(':')
        .ok_or_else(|| BackendError::Rejected(format!("bad cursor: {cursor}")))?;
    let ts = ts
        .parse::<i64>()
        .map_err(|_| BackendError::Rejected(format!("bad cursor: {cursor}")))?;
    Ok((ts, id.to_string()))
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same backend behind all three contracts.
    pub fn backends(&self) -> Backends {
        Backends::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    pub fn add_participant(&self, conversation_id: &str, participant: Participant) {
        let mut conversations = self.inner.conversations.write();
        let record = conversations.entry(conversation_id.to_string()).or_default();
        record.participants.retain(|p| p.user_id != participant.user_id);
        record.participants.push(participant);
    }

    pub fn set_status(&self, conversation_id: &str, status: ConversationStatus) {
        let mut conversations = self.inner.conversations.write();
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .status = Some(status);
    }

    /// Store history without notifying subscribers.
    pub fn seed_message(&self, msg: Message) {
        let mut conversations = self.inner.conversations.write();
        conversations
            .entry(msg.conversation_id.clone())
            .or_default()
            .insert(msg);
    }

    /// Someone else sends a text message: stored and broadcast as an insert.
    pub fn deliver_remote(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_role: SenderRole,
        body: &str,
    ) -> Message {
        let msg = self.store_silently(conversation_id, sender_id, sender_role, body);
        self.broadcast(&Topic::messages(conversation_id), TransportEvent::Insert(msg.clone()));
        msg
    }

    /// The viewer read `message_id` on another device.
    pub fn mark_read_elsewhere(&self, conversation_id: &str, message_id: &str) {
        let updated = {
            let mut conversations = self.inner.conversations.write();
            conversations
                .get_mut(conversation_id)
                .and_then(|r| r.messages.iter_mut().find(|m| m.id == message_id))
                .map(|m| {
                    m.status = MessageStatus::Seen;
                    m.clone()
                })
        };
        if let Some(msg) = updated {
            self.broadcast(&Topic::messages(conversation_id), TransportEvent::Update(msg));
        }
    }

    pub fn publish_remote_typing(&self, conversation_id: &str, user_id: &str, is_typing: bool) {
        self.broadcast(
            &Topic::presence(conversation_id),
            TransportEvent::Presence {
                user_id: user_id.to_string(),
                is_typing,
            },
        );
    }

    /// Drop and restore the message stream. Nothing sent in between is
    /// replayed.
    pub fn simulate_reconnect(&self, conversation_id: &str) {
        let topic = Topic::messages(conversation_id);
        self.broadcast(&topic, TransportEvent::Disconnected);
        self.broadcast(&topic, TransportEvent::Reconnected);
    }

    /// Store a message from someone else without broadcasting it, as if the
    /// event was lost while disconnected.
    pub fn store_silently(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_role: SenderRole,
        body: &str,
    ) -> Message {
        let mut conversations = self.inner.conversations.write();
        let record = conversations.entry(conversation_id.to_string()).or_default();
        let msg = Message {
            id: Uuid::new_v4().to_string(),
            local_id: None,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_role,
            kind: MessageKind::Text,
            body: body.to_string(),
            created_at: record.next_timestamp(),
            status: MessageStatus::Delivered,
            attachment: None,
        };
        record.insert(msg.clone());
        msg
    }

    pub fn broadcast(&self, topic: &Topic, event: TransportEvent) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|_, (t, tx)| *t != *topic || tx.send(event.clone()).is_ok());
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.inner.faults.lock().writes = n;
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.inner.faults.lock().uploads = n;
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.inner.faults.lock().fetches = n;
    }

    pub fn fail_next_subscribes(&self, n: usize) {
        self.inner.faults.lock().subscribes = n;
    }

    pub fn fail_next_signed_urls(&self, n: usize) {
        self.inner.faults.lock().signed_urls = n;
    }

    /// Park durable writes until `release_writes`.
    pub fn hold_writes(&self) {
        *self.inner.writes_held.lock() = true;
    }

    pub fn release_writes(&self) {
        *self.inner.writes_held.lock() = false;
        self.inner.writes_released.notify_all();
    }

    pub fn calls(&self) -> CallLog {
        self.inner.calls.lock().clone()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.inner
            .conversations
            .read()
            .get(conversation_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .subscribers
            .lock()
            .values()
            .filter(|(t, _)| t == topic)
            .count()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.objects.read().get(path).cloned()
    }
}

impl DurableStore for MemoryBackend {
    fn create_message(&self, record: NewMessageRecord) -> Result<(), BackendError> {
        {
            let mut held = self.inner.writes_held.lock();
            while *held {
                self.inner.writes_released.wait(&mut held);
            }
        }
        if take_fault(&mut self.inner.faults.lock().writes) {
            return Err(BackendError::Network("write failed".into()));
        }

        let msg = {
            let mut conversations = self.inner.conversations.write();
            let conversation = conversations
                .entry(record.conversation_id.clone())
                .or_default();
            if conversation.messages.iter().any(|m| m.id == record.id) {
                // Same id twice is the same message.
                return Ok(());
            }
            let msg = Message {
                id: record.id,
                local_id: None,
                conversation_id: record.conversation_id,
                sender_id: record.sender_id,
                sender_role: record.sender_role,
                kind: record.kind,
                body: record.body,
                created_at: record.created_at,
                status: MessageStatus::Delivered,
                attachment: record.attachment,
            };
            conversation.insert(msg.clone());
            msg
        };
        self.inner.calls.lock().writes.push(msg.id.clone());
        self.broadcast(
            &Topic::messages(&msg.conversation_id),
            TransportEvent::Insert(msg),
        );
        Ok(())
    }

    fn mark_seen(&self, conversation_id: &str, viewer_id: &str) -> Result<(), BackendError> {
        self.inner
            .calls
            .lock()
            .mark_seen
            .push((conversation_id.to_string(), viewer_id.to_string()));
        let updated: Vec<Message> = {
            let mut conversations = self.inner.conversations.write();
            let Some(record) = conversations.get_mut(conversation_id) else {
                return Ok(());
            };
            record
                .messages
                .iter_mut()
                .filter(|m| m.sender_id != viewer_id && m.status != MessageStatus::Seen)
                .map(|m| {
                    m.status = MessageStatus::Seen;
                    m.clone()
                })
                .collect()
        };
        let topic = Topic::messages(conversation_id);
        for msg in updated {
            self.broadcast(&topic, TransportEvent::Update(msg));
        }
        Ok(())
    }

    fn fetch_page(&self, request: PageRequest) -> Result<Page, BackendError> {
        self.inner.calls.lock().fetches.push(request.clone());
        if take_fault(&mut self.inner.faults.lock().fetches) {
            return Err(BackendError::Network("fetch failed".into()));
        }
        let before = request.cursor.as_deref().map(parse_cursor).transpose()?;

        let conversations = self.inner.conversations.read();
        let Some(record) = conversations.get(&request.conversation_id) else {
            return Ok(Page::default());
        };
        let older: Vec<&Message> = record
            .messages
            .iter()
            .filter(|m| match &before {
                Some((ts, id)) => (m.created_at, &m.id) < (*ts, id),
                None => true,
            })
            .collect();
        let start = older.len().saturating_sub(request.limit);
        let messages: Vec<Message> = older[start..].iter().map(|m| (*m).clone()).collect();
        let next_cursor = if start > 0 {
            messages.first().map(cursor_for)
        } else {
            None
        };
        Ok(Page {
            messages,
            participants: record.participants.clone(),
            next_cursor,
            status: record.status,
        })
    }
}

impl ObjectStorage for MemoryBackend {
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, BackendError> {
        if take_fault(&mut self.inner.faults.lock().uploads) {
            return Err(BackendError::Network("upload failed".into()));
        }
        self.inner
            .objects
            .write()
            .insert(path.to_string(), bytes.to_vec());
        self.inner.calls.lock().uploads.push(path.to_string());
        Ok(path.to_string())
    }

    fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, BackendError> {
        if take_fault(&mut self.inner.faults.lock().signed_urls) {
            return Err(BackendError::Network("signing failed".into()));
        }
        if !self.inner.objects.read().contains_key(path) {
            return Err(BackendError::NotFound(path.to_string()));
        }
        Ok(format!("memory://{path}?expires={}", ttl.as_secs()))
    }
}

impl Transport for MemoryBackend {
    fn subscribe(&self, topic: &Topic) -> Result<Subscription, BackendError> {
        if take_fault(&mut self.inner.faults.lock().subscribes) {
            return Err(BackendError::Network("subscribe failed".into()));
        }
        let handle = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::unbounded();
        self.inner
            .subscribers
            .lock()
            .insert(handle, (topic.clone(), tx));
        Ok(Subscription {
            handle: SubscriptionHandle(handle),
            events: rx,
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        // Dropping the sender ends the subscriber's stream.
        self.inner.subscribers.lock().remove(&handle.0);
    }

    fn publish_presence(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_typing: bool,
    ) -> Result<(), BackendError> {
        self.inner.calls.lock().presence.push((
            conversation_id.to_string(),
            user_id.to_string(),
            is_typing,
        ));
        self.publish_remote_typing(conversation_id, user_id, is_typing);
        Ok(())
    }
}
