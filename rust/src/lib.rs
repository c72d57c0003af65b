mod actions;
mod backend;
mod core;
mod error;
mod logging;
mod memory_backend;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::{AppAction, OutgoingAttachment};
pub use backend::*;
pub use crate::core::paging::ScrollAnchor;
pub use error::{BackendError, EngineError};
pub use memory_backend::{CallLog, MemoryBackend};
pub use state::*;
pub use updates::*;

pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Handle to the sync engine. All mutation goes through `dispatch`; reads
/// are snapshots of the latest emitted state.
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

impl ChatApp {
    pub fn new(data_dir: String, backends: Backends) -> Arc<Self> {
        let config = crate::core::load_app_config(&data_dir);
        logging::init_logging(&data_dir, config.log_to_file());
        tracing::info!(data_dir = %data_dir, "ChatApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                config,
                backends,
                shared_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    pub fn sign_in(&self, viewer: ViewerContext) {
        self.dispatch(AppAction::SignIn { viewer });
    }

    /// Open `conversation_id` in full-history mode (closing whatever thread
    /// was open) and return a handle scoped to it.
    pub fn open_conversation(&self, conversation_id: &str) -> ConversationHandle {
        self.dispatch(AppAction::OpenConversation {
            conversation_id: conversation_id.to_string(),
        });
        self.conversation(conversation_id)
    }

    /// Track unread messages for an inbox row or badge.
    pub fn watch_conversation(&self, conversation_id: &str) {
        self.dispatch(AppAction::WatchConversation {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub fn conversation(&self, conversation_id: &str) -> ConversationHandle {
        ConversationHandle {
            conversation_id: conversation_id.to_string(),
            core_tx: self.core_tx.clone(),
            shared_state: self.shared_state.clone(),
        }
    }
}

/// Conversation-scoped view of the engine. Reads are synchronous over the
/// latest snapshot; callers re-render on `AppUpdate`, they don't poll.
#[derive(Clone)]
pub struct ConversationHandle {
    conversation_id: String,
    core_tx: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,
}

impl ConversationHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    fn snapshot(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn dispatch(&self, action: AppAction) {
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    /// The open-thread projection, if this conversation is the open one.
    pub fn view(&self) -> Option<ConversationViewState> {
        self.snapshot()
            .current_conversation
            .filter(|c| c.conversation_id == self.conversation_id)
    }

    pub fn groups(&self) -> Vec<MessageGroup> {
        self.view().map(|v| v.groups).unwrap_or_default()
    }

    pub fn has_more(&self) -> bool {
        self.view().is_some_and(|v| v.has_more)
    }

    pub fn typing_users(&self) -> Vec<TypingMember> {
        self.view().map(|v| v.typing_members).unwrap_or_default()
    }

    pub fn unread_messages(&self) -> Vec<String> {
        self.snapshot()
            .summary(&self.conversation_id)
            .map(|s| s.unread_messages.clone())
            .unwrap_or_default()
    }

    pub fn send_message(
        &self,
        content: impl Into<String>,
        kind: MessageKind,
        attachment: Option<OutgoingAttachment>,
    ) {
        self.dispatch(AppAction::SendMessage {
            conversation_id: self.conversation_id.clone(),
            content: content.into(),
            kind,
            attachment,
        });
    }

    pub fn load_more(&self) {
        self.dispatch(AppAction::LoadOlderMessages {
            conversation_id: self.conversation_id.clone(),
        });
    }

    pub fn set_typing(&self, is_typing: bool) {
        self.dispatch(AppAction::SetTyping {
            conversation_id: self.conversation_id.clone(),
            is_typing,
        });
    }

    pub fn resend(&self, message_id: &str) {
        self.dispatch(AppAction::ResendMessage {
            conversation_id: self.conversation_id.clone(),
            message_id: message_id.to_string(),
        });
    }

    pub fn reload(&self) {
        self.dispatch(AppAction::ReloadConversation {
            conversation_id: self.conversation_id.clone(),
        });
    }

    /// Closes the thread only if it is still the open one when the actor
    /// gets to it.
    pub fn close(&self) {
        self.dispatch(AppAction::CloseConversation {
            conversation_id: self.conversation_id.clone(),
        });
    }
}
