pub(crate) mod config;
pub(crate) mod merge;
pub(crate) mod store;

mod outbound;
mod read_state;
mod subscription;
mod sync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::Sender;

use crate::actions::EngineAction;
use crate::error::EngineError;
use crate::remote::{RemoteMessageLog, RemoteSubscription};
use crate::state::{iso_from_epoch_ms, now_epoch_ms, Message, MessageKind, Participant, RemoteRecord};
use crate::updates::{CoreMsg, EngineQuery, EngineUpdate, InternalEvent};

use config::EngineConfig;
use store::MessageStore;
use subscription::LiveSubscription;

/// The engine actor: one per engine instance, single logical writer for the
/// local store. Async remote legs run on the private runtime and re-enter
/// through `InternalEvent`s.
pub(crate) struct EngineCore {
    store: MessageStore,
    remote: Arc<dyn RemoteMessageLog>,
    update_sender: Sender<EngineUpdate>,
    core_sender: Sender<CoreMsg>,
    runtime: tokio::runtime::Runtime,
    config: EngineConfig,

    /// Canonical identifier of the user this engine instance belongs to.
    viewer_id: String,
    /// Conversation currently on screen, if any. Distinct from `live`: the
    /// view can be open with the network disabled.
    open_view: Option<String>,
    live: Option<LiveSubscription>,
    live_token: u64,
    sync_running: Arc<AtomicBool>,
    last_outgoing_ms: i64,
}

impl EngineCore {
    pub(crate) fn new(
        store: MessageStore,
        config: EngineConfig,
        viewer_id: String,
        remote: Arc<dyn RemoteMessageLog>,
        update_sender: Sender<EngineUpdate>,
        core_sender: Sender<CoreMsg>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        Self {
            store,
            remote,
            update_sender,
            core_sender,
            runtime,
            config,
            viewer_id,
            open_view: None,
            live: None,
            live_token: 0,
            sync_running: Arc::new(AtomicBool::new(false)),
            last_outgoing_ms: 0,
        }
    }

    pub(crate) fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                tracing::debug!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Query(query) => self.handle_query(*query),
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: EngineAction) {
        match action {
            EngineAction::OpenConversation {
                conversation_id,
                participant_a,
                participant_b,
            } => self.open_conversation(conversation_id, participant_a, participant_b),
            EngineAction::CloseConversation { conversation_id } => {
                self.close_conversation(&conversation_id)
            }
            EngineAction::Reconcile { participant_id } => self.reconcile(&participant_id),
        }
    }

    fn handle_query(&mut self, query: EngineQuery) {
        match query {
            EngineQuery::SendMessage {
                conversation_id,
                sender_id,
                sender_role,
                recipient_id,
                recipient_role,
                body,
                reply,
            } => {
                let result = self.handle_send(
                    conversation_id,
                    sender_id,
                    sender_role,
                    recipient_id,
                    recipient_role,
                    body,
                );
                let _ = reply.send(result);
            }
            EngineQuery::History {
                conversation_id,
                reply,
            } => {
                let messages = self
                    .store
                    .list_by_conversation(&conversation_id)
                    .unwrap_or_else(|e| {
                        tracing::warn!(%e, conversation_id = %conversation_id, "history read failed");
                        Vec::new()
                    });
                let _ = reply.send(messages);
            }
            EngineQuery::ConversationList {
                participant_id,
                reply,
            } => {
                let summaries = self.store.list_summaries(&participant_id).unwrap_or_else(|e| {
                    tracing::warn!(%e, participant_id = %participant_id, "summary read failed");
                    Vec::new()
                });
                let _ = reply.send(summaries);
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ReconcileBatch {
                conversation_id,
                records,
            } => self.handle_reconcile_batch(conversation_id, records),
            InternalEvent::SubscriptionOpened {
                token,
                subscription,
            } => self.handle_subscription_opened(token, subscription),
            InternalEvent::LiveRecord { token, record } => self.handle_live_record(token, record),
            InternalEvent::RemoteAppendResult {
                conversation_id,
                local_id,
                result,
            } => self.handle_append_result(conversation_id, local_id, result),
        }
    }

    /// Screen entry: summary row, bulk mark-read, one reconciliation pass,
    /// live subscription.
    fn open_conversation(
        &mut self,
        conversation_id: String,
        participant_a: Participant,
        participant_b: Participant,
    ) {
        tracing::info!(conversation_id = %conversation_id, "open conversation");

        let cold_start = match self.store.summary_exists(&conversation_id) {
            Ok(exists) => !exists,
            Err(e) => {
                tracing::warn!(%e, conversation_id = %conversation_id, "summary lookup failed");
                false
            }
        };
        if let Err(e) = self.store.upsert_summary(
            &conversation_id,
            &participant_a.id,
            &participant_b.id,
            None,
            None,
        ) {
            tracing::warn!(%e, conversation_id = %conversation_id, "summary upsert failed");
        }
        if cold_start {
            // Counters are maintained incrementally from here on; the full
            // scan happens once, when the summary row is first created.
            if let Err(e) = self.store.recount_unread(&conversation_id) {
                tracing::warn!(%e, conversation_id = %conversation_id, "unread recount failed");
            }
        }

        self.open_view = Some(conversation_id.clone());
        self.on_conversation_opened(&conversation_id);

        let viewer = self.viewer_id.clone();
        self.reconcile(&viewer);
        self.open_live(&conversation_id);
        self.emit_update(EngineUpdate::ConversationListChanged);
    }

    /// Screen exit. Safe to call when nothing (or something else) is open.
    fn close_conversation(&mut self, conversation_id: &str) {
        if self.open_view.as_deref() == Some(conversation_id) {
            self.open_view = None;
        }
        if self
            .live
            .as_ref()
            .map(|l| l.conversation_id.as_str())
            == Some(conversation_id)
        {
            self.close_live();
        }
    }

    fn emit_update(&self, update: EngineUpdate) {
        let _ = self.update_sender.send(update);
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        // Guaranteed subscription release even if the actor loop ends without
        // an explicit close.
        self.close_live();
    }
}
