//! Offline-first chat synchronization engine.
//!
//! Keeps a per-conversation message log consistent between a local rusqlite
//! cache and a remote realtime append log, while a live subscription streams
//! new records into the UI exactly once. Consistency comes from idempotent
//! merging (at-least-once delivery + dedup), not from any transaction
//! spanning the two stores.

mod actions;
mod core;
mod error;
mod identity;
mod logging;
mod remote;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use flume::{Receiver, Sender};

pub use actions::EngineAction;
pub use error::EngineError;
pub use identity::{conversation_id, AuthFirstResolver, IdentityResolver, ParticipantRef};
pub use remote::{MemoryRemoteLog, RemoteMessageLog, RemoteSubscription};
pub use state::*;
pub use updates::{CoreMsg, EngineQuery, EngineUpdate, InternalEvent};

/// UI-side callback for the engine's update stream.
pub trait EngineListener: Send + Sync + 'static {
    fn on_update(&self, update: EngineUpdate);
}

/// Handle to one engine instance.
///
/// All mutations flow through a single actor thread (one logical writer for
/// the local store); the handle itself is cheap to share behind an `Arc`.
pub struct ChatEngine {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<EngineUpdate>,
    listening: AtomicBool,
    resolver: Arc<dyn IdentityResolver>,
}

impl ChatEngine {
    /// Open the local store under `data_dir` and start the engine actor for
    /// `viewer_id` (the canonical identifier of the logged-in user).
    pub fn new(
        data_dir: impl Into<String>,
        viewer_id: impl Into<String>,
        remote: Arc<dyn RemoteMessageLog>,
    ) -> anyhow::Result<Self> {
        Self::with_resolver(data_dir, viewer_id, remote, Arc::new(AuthFirstResolver))
    }

    pub fn with_resolver(
        data_dir: impl Into<String>,
        viewer_id: impl Into<String>,
        remote: Arc<dyn RemoteMessageLog>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> anyhow::Result<Self> {
        logging::init_logging();
        let data_dir = data_dir.into();
        let viewer_id = viewer_id.into();
        tracing::info!(data_dir = %data_dir, viewer_id = %viewer_id, "ChatEngine starting");

        let config = crate::core::config::load_engine_config(&data_dir);
        let store = crate::core::store::MessageStore::open(&data_dir, config.db_file())
            .context("open local message store")?;

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();

        // Actor loop thread (single-threaded engine actor).
        let core_tx_for_core = core_tx.clone();
        thread::spawn(move || {
            let mut engine_core = crate::core::EngineCore::new(
                store,
                config,
                viewer_id,
                remote,
                update_tx,
                core_tx_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                engine_core.handle_message(msg);
            }
        });

        Ok(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            resolver,
        })
    }

    /// Resolve a dual-identity participant reference to its canonical
    /// identifier. Call this before deriving conversation keys from raw
    /// local/auth id pairs.
    pub fn resolve_participant(&self, participant: &ParticipantRef) -> Result<String, EngineError> {
        self.resolver.resolve_canonical(participant)
    }

    /// Screen entry: derives the conversation key, then asks the actor to
    /// reconcile, mark read, and attach the live subscription.
    pub fn open_conversation(
        &self,
        participant_a: &Participant,
        participant_b: &Participant,
    ) -> Result<String, EngineError> {
        let conversation_id = conversation_id(&participant_a.id, &participant_b.id)?;
        let _ = self
            .core_tx
            .send(CoreMsg::Action(EngineAction::OpenConversation {
                conversation_id: conversation_id.clone(),
                participant_a: participant_a.clone(),
                participant_b: participant_b.clone(),
            }));
        Ok(conversation_id)
    }

    /// Screen exit. Safe when nothing is open.
    pub fn close_conversation(&self, conversation_id: &str) {
        let _ = self
            .core_tx
            .send(CoreMsg::Action(EngineAction::CloseConversation {
                conversation_id: conversation_id.to_string(),
            }));
    }

    /// Best-effort bulk pull-then-merge; returns immediately. Skipped
    /// entirely if a pass is already running.
    pub fn reconcile(&self, participant_id: &str) {
        let _ = self.core_tx.send(CoreMsg::Action(EngineAction::Reconcile {
            participant_id: participant_id.to_string(),
        }));
    }

    /// Local-first send. On return the message is persisted and visible
    /// through [`ChatEngine::get_history`]; the remote leg completes in the
    /// background and a failure there surfaces only as a
    /// [`EngineUpdate::SendFailed`] warning.
    pub fn send_message(
        &self,
        conversation_id: &str,
        sender: &Participant,
        recipient: &Participant,
        body: &str,
    ) -> Result<Message, EngineError> {
        let (reply, rx) = flume::bounded(1);
        self.core_tx
            .send(CoreMsg::Query(Box::new(EngineQuery::SendMessage {
                conversation_id: conversation_id.to_string(),
                sender_id: sender.id.clone(),
                sender_role: sender.role.clone(),
                recipient_id: recipient.id.clone(),
                recipient_role: recipient.role.clone(),
                body: body.to_string(),
                reply,
            })))
            .map_err(|_| EngineError::Shutdown)?;
        rx.recv().map_err(|_| EngineError::Shutdown)?
    }

    /// Ordered history for a conversation; empty on store failure (logged).
    pub fn get_history(&self, conversation_id: &str) -> Vec<Message> {
        let (reply, rx) = flume::bounded(1);
        if self
            .core_tx
            .send(CoreMsg::Query(Box::new(EngineQuery::History {
                conversation_id: conversation_id.to_string(),
                reply,
            })))
            .is_err()
        {
            return Vec::new();
        }
        rx.recv().unwrap_or_default()
    }

    /// Inbox view: every conversation the participant appears in, newest
    /// activity first.
    pub fn get_conversation_list(&self, participant_id: &str) -> Vec<ConversationSummary> {
        let (reply, rx) = flume::bounded(1);
        if self
            .core_tx
            .send(CoreMsg::Query(Box::new(EngineQuery::ConversationList {
                participant_id: participant_id.to_string(),
                reply,
            })))
            .is_err()
        {
            return Vec::new();
        }
        rx.recv().unwrap_or_default()
    }

    /// Generic dispatch. Contract: never blocks the caller.
    pub fn dispatch(&self, action: EngineAction) {
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    /// Register the single update listener. Later calls are ignored so the
    /// stream is never split between listeners.
    pub fn listen_for_updates(&self, listener: Box<dyn EngineListener>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                listener.on_update(update);
            }
        });
    }
}
