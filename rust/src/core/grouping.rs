// Sender/time-window grouping for compact transcript rendering.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::state::{Message, MessageGroup, Participant};

pub(crate) const DEFAULT_GROUP_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Partition an ascending, `created_at`-sorted message list into groups of
/// consecutive messages from one sender.
///
/// A new group starts on the first message, when the sender changes, or when
/// the message is more than `window_ms` after the running group's first
/// message. Messages whose sender is not in `participants` are skipped; the
/// caller regroups once fuller participant data lands.
///
/// The input is never reordered, so running this twice on the same input
/// yields identical output.
pub(crate) fn group_messages(
    messages: &[Message],
    participants: &[Participant],
    window_ms: i64,
) -> Vec<MessageGroup> {
    let by_id: HashMap<&str, &Participant> = participants
        .iter()
        .map(|p| (p.user_id.as_str(), p))
        .collect();

    let mut groups: Vec<MessageGroup> = Vec::new();
    let mut skipped = 0usize;
    let mut first_missing: Option<&str> = None;

    for msg in messages {
        let Some(sender) = by_id.get(msg.sender_id.as_str()) else {
            skipped += 1;
            first_missing.get_or_insert(msg.sender_id.as_str());
            continue;
        };

        if let Some(current) = groups.last_mut() {
            let same_sender = current.sender_id == msg.sender_id;
            let within_window = msg.created_at - current.timestamp <= window_ms;
            if same_sender && within_window {
                current.messages.push(msg.clone());
                continue;
            }
        }

        let show_header = groups
            .last()
            .map(|prev| prev.sender_id != msg.sender_id)
            .unwrap_or(true);
        groups.push(MessageGroup {
            sender_id: msg.sender_id.clone(),
            sender_role: msg.sender_role,
            messages: vec![msg.clone()],
            timestamp: msg.created_at,
            sender_info: (*sender).clone(),
            show_header,
        });
    }

    if let Some(sender_id) = first_missing {
        // Either the participant list has not landed yet or the message
        // references a user we will never learn about; keep it observable.
        let err = EngineError::MissingParticipant {
            sender_id: sender_id.to_string(),
        };
        tracing::debug!(skipped, %err, "grouping skipped messages");
    }

    groups
}
