use uuid::Uuid;

use crate::actions::OutgoingAttachment;
use crate::backend::NewMessageRecord;
use crate::error::EngineError;
use crate::state::{now_millis, Attachment, Message, MessageKind, MessageStatus, ViewerContext};
use crate::updates::{CoreMsg, InternalEvent};

use super::conversation::ConversationSession;
use super::AppCore;

/// What the user submitted, kept until the durable write succeeds so a
/// failed send can be resubmitted.
#[derive(Debug, Clone)]
pub(super) struct OutgoingDraft {
    pub message_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<OutgoingAttachment>,
}

/// An unconfirmed send whose conversation was closed before the write
/// settled. Restored into the thread when it is opened again.
#[derive(Debug, Clone)]
pub(super) struct ParkedSend {
    pub message: Message,
    pub draft: OutgoingDraft,
}

pub(super) fn validate_outgoing(
    content: &str,
    kind: MessageKind,
    attachment: Option<&OutgoingAttachment>,
) -> Result<(), EngineError> {
    match (kind, attachment) {
        (MessageKind::Text, _) if content.trim().is_empty() => {
            Err(EngineError::InvalidMessage("empty message".into()))
        }
        (MessageKind::Text, Some(_)) => Err(EngineError::InvalidMessage(
            "text messages carry no attachment".into(),
        )),
        (MessageKind::Text, None) => Ok(()),
        (_, None) => Err(EngineError::InvalidMessage("missing attachment".into())),
        (_, Some(att)) if att.bytes.is_empty() => {
            Err(EngineError::InvalidMessage("empty attachment".into()))
        }
        (_, Some(_)) => Ok(()),
    }
}

/// Object storage key for an attachment: scoped by conversation and by the
/// message that carries it.
pub(super) fn upload_path(conversation_id: &str, message_id: &str, file_name: &str) -> String {
    let name: String = file_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let name = if name.trim().is_empty() { "file".to_string() } else { name };
    format!("{conversation_id}/{message_id}/{name}")
}

pub(super) fn build_optimistic(
    viewer: &ViewerContext,
    conversation_id: &str,
    message_id: &str,
    local_id: &str,
    draft: &OutgoingDraft,
    created_at: i64,
) -> Message {
    let attachment = draft.attachment.as_ref().map(|a| Attachment {
        storage_path: upload_path(conversation_id, message_id, &a.file_name),
        mime_type: a.mime_type.clone(),
        size_bytes: a.bytes.len() as u64,
        duration_ms: a.duration_ms,
        width: a.width,
        height: a.height,
    });
    let content = draft.content.trim();
    // Media without a caption is referenced by its storage path.
    let body = match (&attachment, content.is_empty()) {
        (Some(att), true) => att.storage_path.clone(),
        _ => content.to_string(),
    };
    Message {
        id: message_id.to_string(),
        local_id: Some(local_id.to_string()),
        conversation_id: conversation_id.to_string(),
        sender_id: viewer.user_id.clone(),
        sender_role: viewer.role,
        kind: draft.kind,
        body,
        created_at,
        status: MessageStatus::Sending,
        attachment,
    }
}

impl AppCore {
    /// Millisecond timestamps can collide on rapid sends; keep our own
    /// strictly increasing so local order matches submit order.
    fn next_outgoing_ms(&mut self) -> i64 {
        let now = now_millis();
        if now <= self.last_outgoing_ms {
            self.last_outgoing_ms += 1;
        } else {
            self.last_outgoing_ms = now;
        }
        self.last_outgoing_ms
    }

    pub(super) fn handle_send_message(
        &mut self,
        conversation_id: &str,
        content: String,
        kind: MessageKind,
        attachment: Option<OutgoingAttachment>,
    ) {
        // No acting user: abort before any optimistic state exists.
        let Some(viewer) = self.viewer.clone() else {
            self.toast(EngineError::AuthenticationRequired.user_visible_message());
            return;
        };
        if let Err(e) = validate_outgoing(&content, kind, attachment.as_ref()) {
            self.toast(e.user_visible_message());
            return;
        }
        if self.current_for(conversation_id).is_none() {
            let err = EngineError::NotOpen(conversation_id.to_string());
            tracing::warn!(%err, "send rejected");
            self.toast(err.user_visible_message());
            return;
        }
        let draft = OutgoingDraft {
            message_id: Uuid::new_v4().to_string(),
            content,
            kind,
            attachment,
        };
        self.submit(conversation_id, &viewer, draft);
    }

    fn submit(&mut self, conversation_id: &str, viewer: &ViewerContext, draft: OutgoingDraft) {
        let created_at = self.next_outgoing_ms();
        self.local_seq += 1;
        let local_id = format!("local-{}", self.local_seq);
        let msg = build_optimistic(
            viewer,
            conversation_id,
            &draft.message_id,
            &local_id,
            &draft,
            created_at,
        );
        let upload = draft.attachment.as_ref().zip(msg.attachment.as_ref()).map(
            |(outgoing, att)| (att.storage_path.clone(), outgoing.bytes.clone()),
        );
        let mut record = NewMessageRecord {
            id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            sender_role: msg.sender_role,
            kind: msg.kind,
            body: msg.body.clone(),
            created_at: msg.created_at,
            attachment: msg.attachment.clone(),
        };
        let message_id = msg.id.clone();

        let Some(session) = self.current_for(conversation_id) else {
            return;
        };
        session.timeline.insert(msg);
        session.outbox.insert(local_id.clone(), draft);
        let stop_typing = session.debounce.stop();
        if stop_typing {
            self.publish_typing(conversation_id, &viewer.user_id, false);
        }
        tracing::info!(conversation_id, %message_id, %local_id, "message queued");
        // Visible before any network call.
        self.emit_current_conversation();

        let store = self.backends.store.clone();
        let storage = self.backends.storage.clone();
        let tx = self.core_sender.clone();
        let conversation_id = conversation_id.to_string();
        self.runtime.spawn_blocking(move || {
            let result = (|| -> Result<Option<String>, EngineError> {
                let mut stored_path = None;
                if let Some((path, bytes)) = upload {
                    // Upload failure aborts the durable write.
                    let stored = storage.upload(&path, &bytes)?;
                    if record.body == path {
                        record.body = stored.clone();
                    }
                    if let Some(att) = record.attachment.as_mut() {
                        att.storage_path = stored.clone();
                    }
                    stored_path = Some(stored);
                }
                store.create_message(record)?;
                Ok(stored_path)
            })();
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendFinished {
                conversation_id,
                local_id,
                result,
            })));
        });
    }

    pub(super) fn handle_send_finished(
        &mut self,
        conversation_id: &str,
        local_id: &str,
        result: Result<Option<String>, EngineError>,
    ) {
        let Some(session) = self
            .current
            .as_mut()
            .filter(|s| s.conversation_id == conversation_id && s.outbox.contains_key(local_id))
        else {
            self.settle_parked(conversation_id, local_id, result);
            return;
        };
        match result {
            Ok(stored_path) => {
                // None: a refetched page confirmed it first.
                let id = session
                    .timeline
                    .advance_local(local_id, MessageStatus::Delivered);
                if let (Some(id), Some(path)) = (id.as_deref(), stored_path.as_deref()) {
                    session.timeline.set_attachment_path(id, path);
                }
                session.outbox.remove(local_id);
                tracing::info!(local_id, id = ?id, "message delivered");
            }
            Err(e) => {
                // Never retried automatically: a blind retry could duplicate.
                let id = session.timeline.advance_local(local_id, MessageStatus::Failed);
                tracing::warn!(local_id, id = ?id, %e, "send failed");
            }
        }
        self.emit_current_conversation();
    }

    /// Write result for a send whose thread is no longer open.
    fn settle_parked(
        &mut self,
        conversation_id: &str,
        local_id: &str,
        result: Result<Option<String>, EngineError>,
    ) {
        let Some(parked) = self.parked_sends.get_mut(local_id) else {
            // Signed out since; nothing of that session is kept.
            tracing::info!(conversation_id, local_id, ok = result.is_ok(), "send result dropped");
            return;
        };
        match result {
            Ok(_) => {
                // The next open fetches the durable record.
                self.parked_sends.remove(local_id);
                tracing::info!(conversation_id, local_id, "parked message delivered");
            }
            Err(e) => {
                parked.message.status = MessageStatus::Failed;
                tracing::warn!(conversation_id, local_id, %e, "parked send failed");
                self.toast(format!(
                    "A message was not sent. {}",
                    e.user_visible_message()
                ));
            }
        }
    }

    /// Move unconfirmed sends out of a session that is being closed.
    pub(super) fn park_outbox(&mut self, session: &mut ConversationSession) {
        for (local_id, draft) in session.outbox.drain() {
            let Some(message) = session
                .timeline
                .messages()
                .iter()
                .find(|m| m.local_id.as_deref() == Some(local_id.as_str()))
                .cloned()
            else {
                continue;
            };
            tracing::debug!(conversation_id = %session.conversation_id, %local_id, status = ?message.status, "send parked");
            self.parked_sends.insert(local_id, ParkedSend { message, draft });
        }
    }

    /// Put parked sends back into a freshly opened thread.
    pub(super) fn restore_parked(&mut self, session: &mut ConversationSession) {
        let local_ids: Vec<String> = self
            .parked_sends
            .iter()
            .filter(|(_, p)| p.message.conversation_id == session.conversation_id)
            .map(|(local_id, _)| local_id.clone())
            .collect();
        for local_id in local_ids {
            if let Some(parked) = self.parked_sends.remove(&local_id) {
                session.timeline.insert(parked.message);
                session.outbox.insert(local_id, parked.draft);
            }
        }
    }

    /// Resubmit a failed message as a brand-new send with a new id.
    pub(super) fn handle_resend_message(&mut self, conversation_id: &str, message_id: &str) {
        let Some(viewer) = self.viewer.clone() else {
            self.toast(EngineError::AuthenticationRequired.user_visible_message());
            return;
        };
        let Some(draft) = self.take_failed(conversation_id, message_id) else {
            self.toast("Nothing to resend");
            return;
        };
        let draft = OutgoingDraft {
            message_id: Uuid::new_v4().to_string(),
            ..draft
        };
        tracing::info!(conversation_id, failed_id = message_id, new_id = %draft.message_id, "resend");
        self.submit(conversation_id, &viewer, draft);
    }

    pub(super) fn handle_discard_message(&mut self, conversation_id: &str, message_id: &str) {
        if self.take_failed(conversation_id, message_id).is_some() {
            self.emit_current_conversation();
        }
    }

    /// Remove a failed message and its draft from the open thread.
    fn take_failed(&mut self, conversation_id: &str, message_id: &str) -> Option<OutgoingDraft> {
        let session = self.current_for(conversation_id)?;
        let failed = session
            .timeline
            .get(message_id)
            .is_some_and(|m| m.status == MessageStatus::Failed);
        if !failed {
            return None;
        }
        let local_id = session
            .outbox
            .iter()
            .find(|(_, d)| d.message_id == message_id)
            .map(|(local_id, _)| local_id.clone())?;
        session.timeline.remove(message_id);
        session.outbox.remove(&local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SenderRole;

    fn viewer() -> ViewerContext {
        ViewerContext {
            user_id: "agent-a".into(),
            display_name: "Alice".into(),
            role: SenderRole::Agent,
        }
    }

    fn photo() -> OutgoingAttachment {
        OutgoingAttachment {
            file_name: "shot.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![1, 2, 3, 4],
            duration_ms: None,
            width: Some(2),
            height: Some(2),
        }
    }

    #[test]
    fn text_must_not_be_blank() {
        assert!(validate_outgoing("  \n", MessageKind::Text, None).is_err());
        assert!(validate_outgoing("hi", MessageKind::Text, None).is_ok());
    }

    #[test]
    fn media_requires_attachment() {
        assert!(validate_outgoing("", MessageKind::Image, None).is_err());
        assert!(validate_outgoing("", MessageKind::Image, Some(&photo())).is_ok());
        let mut empty = photo();
        empty.bytes.clear();
        assert!(validate_outgoing("", MessageKind::Image, Some(&empty)).is_err());
    }

    #[test]
    fn upload_path_is_scoped_and_sanitized() {
        assert_eq!(upload_path("c1", "m1", "a.pdf"), "c1/m1/a.pdf");
        assert_eq!(upload_path("c1", "m1", "../x/y.pdf"), "c1/m1/.._x_y.pdf");
        assert_eq!(upload_path("c1", "m1", " "), "c1/m1/file");
    }

    #[test]
    fn optimistic_message_starts_sending_with_local_id() {
        let draft = OutgoingDraft {
            message_id: "m1".into(),
            content: "  Test message ".into(),
            kind: MessageKind::Text,
            attachment: None,
        };
        let msg = build_optimistic(&viewer(), "c1", "m1", "local-1", &draft, 1_000);
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.local_id.as_deref(), Some("local-1"));
        assert_eq!(msg.status, MessageStatus::Sending);
        assert_eq!(msg.sender_id, "agent-a");
        assert_eq!(msg.sender_role, SenderRole::Agent);
        assert_eq!(msg.body, "Test message");
        assert!(msg.attachment.is_none());
    }

    #[test]
    fn uncaptioned_media_body_references_storage_path() {
        let draft = OutgoingDraft {
            message_id: "m2".into(),
            content: String::new(),
            kind: MessageKind::Image,
            attachment: Some(photo()),
        };
        let msg = build_optimistic(&viewer(), "c1", "m2", "local-2", &draft, 1_000);
        let att = msg.attachment.as_ref().unwrap();
        assert_eq!(att.storage_path, "c1/m2/shot.png");
        assert_eq!(att.size_bytes, 4);
        assert_eq!(att.mime_class(), "image");
        assert_eq!(msg.body, "c1/m2/shot.png");
    }
}
