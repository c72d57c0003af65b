use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use deskchat_core::{
    AppAction, AppReconciler, AppUpdate, ChatApp, ConversationHandle, MemoryBackend, Message,
    MessageKind, MessageStatus, OutgoingAttachment, Participant, SenderRole, Topic, ViewerContext,
};
use tempfile::tempdir;

const VIEWER: &str = "agent-a";
const CUSTOMER: &str = "customer-b";

fn write_config(data_dir: &str, v: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("deskchat_config.json");
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

fn viewer() -> ViewerContext {
    ViewerContext {
        user_id: VIEWER.into(),
        display_name: "Alice".into(),
        role: SenderRole::Agent,
    }
}

fn participant(user_id: &str, name: &str, role: SenderRole) -> Participant {
    Participant {
        user_id: user_id.into(),
        display_name: name.into(),
        role,
        avatar_url: None,
    }
}

fn backend_with(conversations: &[&str]) -> MemoryBackend {
    let backend = MemoryBackend::new();
    for id in conversations {
        backend.add_participant(id, participant(VIEWER, "Alice", SenderRole::Agent));
        backend.add_participant(id, participant(CUSTOMER, "Bob", SenderRole::Customer));
    }
    backend
}

fn start(dir: &tempfile::TempDir, config: serde_json::Value, backend: &MemoryBackend) -> Arc<ChatApp> {
    let data_dir = dir.path().to_string_lossy().to_string();
    write_config(&data_dir, config);
    ChatApp::new(data_dir, backend.backends())
}

fn signed_in(dir: &tempfile::TempDir, config: serde_json::Value, backend: &MemoryBackend) -> Arc<ChatApp> {
    let app = start(dir, config, backend);
    app.sign_in(viewer());
    wait_until("signed in", Duration::from_secs(2), || {
        app.state().viewer.is_some()
    });
    app
}

fn open_loaded(app: &ChatApp, backend: &MemoryBackend, conversation_id: &str) -> ConversationHandle {
    let handle = app.open_conversation(conversation_id);
    wait_until("conversation loaded", Duration::from_secs(2), || {
        handle.view().is_some_and(|v| !v.loading)
            && backend.subscriber_count(&Topic::messages(conversation_id)) == 1
            && backend.subscriber_count(&Topic::presence(conversation_id)) == 1
    });
    handle
}

fn all_messages(handle: &ConversationHandle) -> Vec<Message> {
    handle
        .groups()
        .into_iter()
        .flat_map(|g| g.messages.into_iter())
        .collect()
}

fn seed_history(backend: &MemoryBackend, conversation_id: &str, n: usize) {
    for i in 1..=n {
        backend.seed_message(Message {
            id: format!("h{i:03}"),
            local_id: None,
            conversation_id: conversation_id.into(),
            sender_id: CUSTOMER.into(),
            sender_role: SenderRole::Customer,
            kind: MessageKind::Text,
            body: format!("history {i}"),
            created_at: i as i64 * 1_000,
            status: MessageStatus::Seen,
            attachment: None,
        });
    }
}

#[test]
fn remote_message_is_grouped_and_marked_seen() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let (reconciler, updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(reconciler));

    let handle = open_loaded(&app, &backend, "c1");
    assert!(backend.calls().mark_seen.is_empty());

    let hi = backend.deliver_remote("c1", CUSTOMER, SenderRole::Customer, "Hi");
    wait_until("message shown", Duration::from_secs(2), || {
        handle.groups().len() == 1
    });
    let groups = handle.groups();
    assert_eq!(groups[0].sender_id, CUSTOMER);
    assert_eq!(groups[0].sender_info.display_name, "Bob");
    assert!(groups[0].show_header);
    assert_eq!(groups[0].messages.len(), 1);
    assert_eq!(groups[0].messages[0].body, "Hi");

    wait_until("mark seen issued", Duration::from_secs(2), || {
        backend
            .calls()
            .mark_seen
            .contains(&("c1".to_string(), VIEWER.to_string()))
    });
    wait_until("notification cue", Duration::from_secs(2), || {
        updates.lock().unwrap().iter().any(|u| {
            matches!(u, AppUpdate::NotificationCue { message_id, .. } if *message_id == hi.id)
        })
    });
    wait_until("seen status merged", Duration::from_secs(2), || {
        all_messages(&handle)
            .first()
            .is_some_and(|m| m.status == MessageStatus::Seen)
    });
}

#[test]
fn unknown_sender_is_left_out_of_groups() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    backend.deliver_remote("c1", "stranger", SenderRole::Customer, "who am i");
    backend.deliver_remote("c1", CUSTOMER, SenderRole::Customer, "Hello");
    wait_until("known sender shown", Duration::from_secs(2), || {
        all_messages(&handle).iter().any(|m| m.body == "Hello")
    });
    let messages = all_messages(&handle);
    assert_eq!(messages.len(), 1);
    assert!(messages.iter().all(|m| m.sender_id != "stranger"));
    // Still the latest message of the conversation.
    let view = handle.view().unwrap();
    assert_eq!(view.last_message.unwrap().body, "Hello");
}

#[test]
fn send_is_optimistic_then_delivered_without_duplicates() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    backend.hold_writes();
    handle.send_message("Test message", MessageKind::Text, None);
    wait_until("optimistic message", Duration::from_secs(2), || {
        all_messages(&handle)
            .iter()
            .any(|m| m.body == "Test message" && m.status == MessageStatus::Sending)
    });
    let pending = all_messages(&handle).pop().unwrap();
    assert!(pending.local_id.is_some());
    assert_eq!(pending.sender_id, VIEWER);

    backend.release_writes();
    wait_until("delivered", Duration::from_secs(2), || {
        handle
            .view()
            .and_then(|v| v.find_message(&pending.id).cloned())
            .is_some_and(|m| m.status == MessageStatus::Delivered)
    });
    // The echo of our own write has arrived by now; give it a moment anyway.
    std::thread::sleep(Duration::from_millis(100));
    let messages = all_messages(&handle);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, pending.id);
    assert_eq!(messages[0].local_id, None);
    assert_eq!(backend.calls().writes, vec![pending.id.clone()]);
}

#[test]
fn failed_write_keeps_message_and_resend_uses_new_id() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    backend.fail_next_writes(1);
    handle.send_message("Test message", MessageKind::Text, None);
    wait_until("failed", Duration::from_secs(2), || {
        all_messages(&handle)
            .iter()
            .any(|m| m.status == MessageStatus::Failed)
    });
    // No silent retry.
    std::thread::sleep(Duration::from_millis(150));
    let messages = all_messages(&handle);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Failed);
    assert!(backend.calls().writes.is_empty());

    let failed_id = messages[0].id.clone();
    handle.resend(&failed_id);
    wait_until("resent", Duration::from_secs(2), || {
        let messages = all_messages(&handle);
        messages.len() == 1 && messages[0].status == MessageStatus::Delivered
    });
    let resent = all_messages(&handle).pop().unwrap();
    assert_ne!(resent.id, failed_id);
    assert_eq!(resent.body, "Test message");
}

#[test]
fn failed_send_after_switching_away_is_reported_and_restored() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1", "c2"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let first = open_loaded(&app, &backend, "c1");

    backend.hold_writes();
    backend.fail_next_writes(1);
    first.send_message("important", MessageKind::Text, None);
    wait_until("optimistic message", Duration::from_secs(2), || {
        all_messages(&first).iter().any(|m| m.body == "important")
    });

    let second = open_loaded(&app, &backend, "c2");
    backend.release_writes();
    wait_until("failure surfaced", Duration::from_secs(2), || {
        app.state().toast.is_some()
    });
    assert!(second.groups().is_empty());
    assert!(backend.calls().writes.is_empty());

    let first = open_loaded(&app, &backend, "c1");
    wait_until("failed message restored", Duration::from_secs(2), || {
        all_messages(&first)
            .iter()
            .any(|m| m.body == "important" && m.status == MessageStatus::Failed)
    });
    let failed_id = all_messages(&first).pop().unwrap().id;
    first.resend(&failed_id);
    wait_until("resent", Duration::from_secs(2), || {
        let messages = all_messages(&first);
        messages.len() == 1 && messages[0].status == MessageStatus::Delivered
    });
    assert_eq!(backend.calls().writes.len(), 1);
}

#[test]
fn send_without_viewer_creates_no_optimistic_state() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = start(&dir, serde_json::json!({}), &backend);

    app.dispatch(AppAction::SendMessage {
        conversation_id: "c1".into(),
        content: "hello?".into(),
        kind: MessageKind::Text,
        attachment: None,
    });
    wait_until("auth toast", Duration::from_secs(2), || {
        app.state().toast.as_deref() == Some("Please sign in again")
    });
    let state = app.state();
    assert!(state.current_conversation.is_none());
    assert!(backend.calls().writes.is_empty());
    assert!(backend.messages("c1").is_empty());
}

#[test]
fn summary_counts_unread_from_others_only() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = app.conversation("c1");
    app.watch_conversation("c1");
    wait_until("watch subscribed", Duration::from_secs(2), || {
        backend.subscriber_count(&Topic::messages("c1")) == 1
    });
    assert!(handle.unread_messages().is_empty());

    let first = backend.deliver_remote("c1", CUSTOMER, SenderRole::Customer, "one");
    wait_until("unread +1", Duration::from_secs(2), || {
        handle.unread_messages() == vec![first.id.clone()]
    });

    backend.mark_read_elsewhere("c1", &first.id);
    wait_until("unread -1", Duration::from_secs(2), || {
        handle.unread_messages().is_empty()
    });

    let own = backend.deliver_remote("c1", VIEWER, SenderRole::Agent, "from my phone");
    let second = backend.deliver_remote("c1", CUSTOMER, SenderRole::Customer, "two");
    wait_until("second unread", Duration::from_secs(2), || {
        handle.unread_messages() == vec![second.id.clone()]
    });
    assert!(!handle.unread_messages().contains(&own.id));
    let state = app.state();
    let summary = state.summary("c1").unwrap();
    assert_eq!(summary.unread_count, 1);
    assert!(!summary.suspended);
    // Summary mode never marks anything seen.
    assert!(backend.calls().mark_seen.is_empty());
}

#[test]
fn opening_a_watched_conversation_suspends_its_summary() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    app.watch_conversation("c1");
    wait_until("watch subscribed", Duration::from_secs(2), || {
        backend.subscriber_count(&Topic::messages("c1")) == 1
    });

    let handle = open_loaded(&app, &backend, "c1");
    // Only the full-history subscription remains.
    assert_eq!(backend.subscriber_count(&Topic::messages("c1")), 1);
    assert!(app.state().summary("c1").unwrap().suspended);

    backend.deliver_remote("c1", CUSTOMER, SenderRole::Customer, "while open");
    wait_until("shown in thread", Duration::from_secs(2), || {
        all_messages(&handle).len() == 1
    });
    assert!(handle.unread_messages().is_empty());

    handle.close();
    wait_until("summary resumed", Duration::from_secs(2), || {
        app.state()
            .summary("c1")
            .is_some_and(|s| !s.suspended)
            && backend.subscriber_count(&Topic::messages("c1")) == 1
            && backend.subscriber_count(&Topic::presence("c1")) == 0
    });
}

#[test]
fn close_applies_to_its_own_conversation_only() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1", "c2"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);

    // Closed before the open ever reached a snapshot.
    let handle = app.open_conversation("c1");
    handle.close();
    wait_until("closed", Duration::from_secs(2), || {
        !backend.calls().fetches.is_empty()
            && app.state().current_conversation.is_none()
            && backend.subscriber_count(&Topic::messages("c1")) == 0
            && backend.subscriber_count(&Topic::presence("c1")) == 0
    });

    let second = open_loaded(&app, &backend, "c2");
    handle.close();
    std::thread::sleep(Duration::from_millis(100));
    assert!(second.view().is_some());
    assert_eq!(backend.subscriber_count(&Topic::messages("c2")), 1);
}

#[test]
fn older_pages_prepend_without_duplicates() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    seed_history(&backend, "c1", 50);
    let app = signed_in(&dir, serde_json::json!({ "page_size": 20 }), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    let view = handle.view().unwrap();
    assert_eq!(view.message_count(), 20);
    assert!(view.has_more);
    assert_eq!(view.anchor_epoch, 0);
    let fetches = backend.calls().fetches;
    assert!(fetches[0].initial);
    assert_eq!(fetches[0].cursor, None);

    handle.load_more();
    wait_until("second page", Duration::from_secs(2), || {
        handle.view().is_some_and(|v| v.anchor_epoch == 1)
    });
    let view = handle.view().unwrap();
    assert_eq!(view.message_count(), 40);
    assert!(!view.loading_older);

    handle.load_more();
    wait_until("last page", Duration::from_secs(2), || {
        handle.view().is_some_and(|v| v.anchor_epoch == 2)
    });
    let view = handle.view().unwrap();
    assert_eq!(view.message_count(), 50);
    assert!(!handle.has_more());

    let messages = all_messages(&handle);
    let ids: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids.len(), 50);
    assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    // 50 seconds from one sender: a single group.
    assert_eq!(handle.groups().len(), 1);

    // Exhausted: no further backward fetch is issued.
    let before = backend.calls().fetches.len();
    handle.load_more();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(backend.calls().fetches.len(), before);
}

#[test]
fn remote_typing_appears_and_expires() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({ "typing_ttl_ms": 300 }), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    backend.publish_remote_typing("c1", CUSTOMER, true);
    wait_until("typing shown", Duration::from_secs(2), || {
        handle
            .typing_users()
            .iter()
            .any(|t| t.user_id == CUSTOMER && t.name.as_deref() == Some("Bob"))
    });
    wait_until("typing expired", Duration::from_secs(2), || {
        handle.typing_users().is_empty()
    });

    backend.publish_remote_typing("c1", CUSTOMER, true);
    wait_until("typing shown again", Duration::from_secs(2), || {
        !handle.typing_users().is_empty()
    });
    backend.publish_remote_typing("c1", CUSTOMER, false);
    wait_until("typing cleared", Duration::from_secs(2), || {
        handle.typing_users().is_empty()
    });

    // Our own signal is never shown back to us.
    handle.set_typing(true);
    std::thread::sleep(Duration::from_millis(100));
    assert!(handle.typing_users().is_empty());
}

#[test]
fn local_typing_is_debounced() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({ "typing_idle_ms": 200 }), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    for _ in 0..3 {
        handle.set_typing(true);
        std::thread::sleep(Duration::from_millis(30));
    }
    wait_until("stopped typing published", Duration::from_secs(2), || {
        backend
            .calls()
            .presence
            .iter()
            .any(|(_, user, typing)| user == VIEWER && !typing)
    });
    let presence = backend.calls().presence;
    let starts = presence.iter().filter(|(_, _, typing)| *typing).count();
    assert_eq!(starts, 1);
}

#[test]
fn switching_conversations_tears_down_previous_subscriptions() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1", "c2"]);
    let app = signed_in(&dir, serde_json::json!({ "typing_ttl_ms": 5000 }), &backend);
    let _first = open_loaded(&app, &backend, "c1");
    backend.publish_remote_typing("c1", CUSTOMER, true);

    let second = open_loaded(&app, &backend, "c2");
    assert_eq!(backend.subscriber_count(&Topic::messages("c1")), 0);
    assert_eq!(backend.subscriber_count(&Topic::presence("c1")), 0);
    assert!(second.typing_users().is_empty());

    backend.deliver_remote("c1", CUSTOMER, SenderRole::Customer, "elsewhere");
    backend.deliver_remote("c2", CUSTOMER, SenderRole::Customer, "here");
    wait_until("c2 message", Duration::from_secs(2), || {
        all_messages(&second).len() == 1
    });
    assert_eq!(all_messages(&second)[0].body, "here");
    assert_eq!(app.state().current_conversation.unwrap().conversation_id, "c2");
}

#[test]
fn reconnect_refetches_latest_page() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    let missed = backend.store_silently("c1", CUSTOMER, SenderRole::Customer, "missed");
    std::thread::sleep(Duration::from_millis(50));
    assert!(all_messages(&handle).is_empty());

    backend.simulate_reconnect("c1");
    wait_until("gap recovered", Duration::from_secs(2), || {
        all_messages(&handle).iter().any(|m| m.id == missed.id)
    });
    let fetches = backend.calls().fetches;
    assert!(fetches.len() >= 2);
    assert!(fetches.iter().all(|f| f.cursor.is_none()));
}

#[test]
fn reconnect_after_a_long_gap_keeps_missed_history_reachable() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({ "page_size": 5 }), &backend);
    let handle = open_loaded(&app, &backend, "c1");
    assert!(!handle.has_more());

    for i in 1..=8 {
        backend.store_silently("c1", CUSTOMER, SenderRole::Customer, &format!("missed {i}"));
    }
    backend.simulate_reconnect("c1");
    wait_until("latest page merged", Duration::from_secs(2), || {
        all_messages(&handle).len() == 5 && handle.has_more()
    });

    handle.load_more();
    wait_until("gap filled", Duration::from_secs(2), || {
        all_messages(&handle).len() == 8
    });
    assert!(!handle.has_more());
    let bodies: Vec<String> = all_messages(&handle).into_iter().map(|m| m.body).collect();
    let expected: Vec<String> = (1..=8).map(|i| format!("missed {i}")).collect();
    assert_eq!(bodies, expected);
}

#[test]
fn reconnect_reconciles_summary_unread() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = app.conversation("c1");
    app.watch_conversation("c1");
    wait_until("watch subscribed", Duration::from_secs(2), || {
        backend.subscriber_count(&Topic::messages("c1")) == 1
    });

    let missed = backend.store_silently("c1", CUSTOMER, SenderRole::Customer, "missed");
    backend.store_silently("c1", VIEWER, SenderRole::Agent, "mine");
    backend.simulate_reconnect("c1");
    wait_until("unread after refetch", Duration::from_secs(2), || {
        handle.unread_messages() == vec![missed.id.clone()]
    });
}

#[test]
fn initial_fetch_failure_is_conversation_level_and_retryable() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    seed_history(&backend, "c1", 3);
    let app = signed_in(&dir, serde_json::json!({}), &backend);

    backend.fail_next_fetches(1);
    let handle = app.open_conversation("c1");
    wait_until("load error", Duration::from_secs(2), || {
        handle.view().is_some_and(|v| v.load_error.is_some() && !v.loading)
    });
    assert!(handle.groups().is_empty());

    handle.reload();
    wait_until("reloaded", Duration::from_secs(2), || {
        handle
            .view()
            .is_some_and(|v| v.load_error.is_none() && v.message_count() == 3)
    });
}

#[test]
fn attachment_upload_failure_skips_durable_write() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    backend.fail_next_uploads(1);
    handle.send_message(
        "",
        MessageKind::Document,
        Some(OutgoingAttachment {
            file_name: "invoice.pdf".into(),
            mime_type: "application/pdf".into(),
            bytes: vec![7; 64],
            duration_ms: None,
            width: None,
            height: None,
        }),
    );
    wait_until("failed", Duration::from_secs(2), || {
        all_messages(&handle)
            .iter()
            .any(|m| m.status == MessageStatus::Failed)
    });
    let calls = backend.calls();
    assert!(calls.uploads.is_empty());
    assert!(calls.writes.is_empty());
}

#[test]
fn attachment_send_uploads_then_resolves_signed_url() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1"]);
    let app = signed_in(&dir, serde_json::json!({ "signed_url_ttl_secs": 600 }), &backend);
    let handle = open_loaded(&app, &backend, "c1");

    handle.send_message(
        "screenshot",
        MessageKind::Image,
        Some(OutgoingAttachment {
            file_name: "shot.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![1, 2, 3],
            duration_ms: None,
            width: Some(640),
            height: Some(480),
        }),
    );
    wait_until("delivered", Duration::from_secs(2), || {
        all_messages(&handle)
            .iter()
            .any(|m| m.status == MessageStatus::Delivered)
    });
    let msg = all_messages(&handle).pop().unwrap();
    let path = msg.attachment.as_ref().unwrap().storage_path.clone();
    assert_eq!(path, format!("c1/{}/shot.png", msg.id));
    assert_eq!(backend.object(&path), Some(vec![1, 2, 3]));

    wait_until("signed url", Duration::from_secs(2), || {
        handle
            .view()
            .is_some_and(|v| v.attachment_urls.get(&path).is_some())
    });
    let url = handle.view().unwrap().attachment_urls[&path].clone();
    assert_eq!(url, format!("memory://{path}?expires=600"));
}

#[test]
fn sign_out_tears_everything_down() {
    let dir = tempdir().unwrap();
    let backend = backend_with(&["c1", "c2"]);
    let app = signed_in(&dir, serde_json::json!({}), &backend);
    app.watch_conversation("c2");
    let _handle = open_loaded(&app, &backend, "c1");
    wait_until("watch subscribed", Duration::from_secs(2), || {
        backend.subscriber_count(&Topic::messages("c2")) == 1
    });

    app.dispatch(AppAction::SignOut);
    wait_until("torn down", Duration::from_secs(2), || {
        let state = app.state();
        state.viewer.is_none()
            && state.current_conversation.is_none()
            && state.summaries.is_empty()
    });
    for id in ["c1", "c2"] {
        assert_eq!(backend.subscriber_count(&Topic::messages(id)), 0);
        assert_eq!(backend.subscriber_count(&Topic::presence(id)), 0);
    }
}
