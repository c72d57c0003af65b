// Folds realtime insert/update events into a conversation's local state.
//
// Merges are pure upserts keyed by message id: replaying an event is a no-op.

use crate::state::{Message, MessageStatus};

use super::timeline::Timeline;
use super::unread::{ReadMode, UnreadSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MessageEvent {
    Insert(Message),
    Update(Message),
}

/// What the caller has to do after a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MergeOutcome {
    /// Local state changed; regroup and emit.
    pub changed: bool,
    /// Id of a newly appended message from someone else.
    pub appended: Option<String>,
    /// Issue `MarkSeen` for the conversation (full-history only).
    pub mark_seen: bool,
}

pub(crate) struct MergeTarget<'a> {
    pub conversation_id: &'a str,
    pub viewer_id: &'a str,
    pub mode: ReadMode,
    pub timeline: &'a mut Timeline,
    pub unread: &'a mut UnreadSet,
}

pub(crate) fn merge_event(target: MergeTarget<'_>, event: MessageEvent) -> MergeOutcome {
    let msg = match &event {
        MessageEvent::Insert(m) | MessageEvent::Update(m) => m,
    };
    if msg.conversation_id != target.conversation_id {
        tracing::warn!(
            expected = %target.conversation_id,
            got = %msg.conversation_id,
            id = %msg.id,
            "event for another conversation ignored"
        );
        return MergeOutcome::default();
    }
    match event {
        MessageEvent::Insert(msg) => merge_insert(target, msg),
        MessageEvent::Update(msg) => merge_update(target, msg),
    }
}

fn merge_insert(target: MergeTarget<'_>, mut msg: Message) -> MergeOutcome {
    if target.timeline.contains(&msg.id) {
        // Our own optimistic record (pre-generated id) or a replay.
        return MergeOutcome::default();
    }
    if msg.sender_id == target.viewer_id {
        // Own echo that did not originate from this view's optimistic path
        // (another tab/device). Ids only dedupe within one client.
        tracing::debug!(id = %msg.id, mode = target.mode.tag(), "own echo ignored");
        return MergeOutcome::default();
    }

    // Remote records never carry our local bookkeeping.
    msg.local_id = None;
    let id = msg.id.clone();
    let status = msg.status;
    target.timeline.insert(msg);

    match target.mode {
        ReadMode::FullHistory => MergeOutcome {
            changed: true,
            appended: Some(id),
            mark_seen: true,
        },
        ReadMode::UpdatesOnly => {
            if status != MessageStatus::Seen {
                target.unread.add(&id);
            }
            MergeOutcome {
                changed: true,
                appended: Some(id),
                mark_seen: false,
            }
        }
    }
}

fn merge_update(target: MergeTarget<'_>, msg: Message) -> MergeOutcome {
    let advanced = target.timeline.advance_status(&msg.id, msg.status);
    let mut unread_changed = false;
    if target.mode == ReadMode::UpdatesOnly && msg.status == MessageStatus::Seen {
        // Read elsewhere; the id may not even be in our window.
        unread_changed = target.unread.remove(&msg.id);
    }
    if !advanced && !target.timeline.contains(&msg.id) {
        tracing::debug!(id = %msg.id, status = ?msg.status, "update for unknown message");
    }
    MergeOutcome {
        changed: advanced || unread_changed,
        appended: None,
        mark_seen: false,
    }
}
