// Bulk reconciliation: pull-then-merge across the remote conversation index.

use super::*;

/// Single-slot re-entrancy guard for reconciliation. Acquired with a
/// compare-and-swap, released on drop so no error path can wedge future
/// passes. Not a queue: a pass that finds the slot taken simply returns.
pub(super) struct SyncGuard(Arc<AtomicBool>);

impl SyncGuard {
    pub(super) fn try_acquire(slot: &Arc<AtomicBool>) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(slot.clone()))
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EngineCore {
    /// Best-effort: never raises. Per-conversation failures are logged and
    /// skipped so one bad conversation cannot abort the rest.
    pub(super) fn reconcile(&mut self, participant_id: &str) {
        let Some(guard) = SyncGuard::try_acquire(&self.sync_running) else {
            tracing::debug!(participant_id, "reconcile already running; skipped");
            return;
        };
        if !self.network_enabled() {
            tracing::debug!(participant_id, "network disabled; reconcile skipped");
            return;
        }

        let remote = self.remote.clone();
        let core_tx = self.core_sender.clone();
        let participant = participant_id.to_string();
        self.runtime.spawn(async move {
            // Held for the whole scan; dropped on every exit path.
            let _guard = guard;

            let conversation_ids = match remote.conversation_ids().await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(%e, "remote index scan failed; sync pass skipped");
                    return;
                }
            };

            let mut matched = 0usize;
            for conversation_id in conversation_ids {
                let records = match remote.read_all(&conversation_id).await {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!(%e, conversation_id = %conversation_id, "read failed; conversation skipped this pass");
                        continue;
                    }
                };
                let involved = records
                    .iter()
                    .any(|r| r.sender_id == participant || r.recipient_id == participant);
                if !involved {
                    continue;
                }
                matched += 1;
                if core_tx
                    .send(CoreMsg::Internal(Box::new(InternalEvent::ReconcileBatch {
                        conversation_id,
                        records,
                    })))
                    .is_err()
                {
                    return;
                }
            }
            tracing::debug!(participant_id = %participant, conversations = matched, "reconcile scan complete");
        });
    }

    /// Serialized merge of one scanned conversation (runs on the actor, so
    /// two passes can never interleave inserts for the same conversation).
    pub(super) fn handle_reconcile_batch(
        &mut self,
        conversation_id: String,
        records: Vec<RemoteRecord>,
    ) {
        if records.is_empty() {
            return;
        }

        // A conversation discovered on the remote side gets its summary row
        // here; participants come from the records themselves.
        match self.store.summary_exists(&conversation_id) {
            Ok(false) => {
                let first = &records[0];
                if let Err(e) = self.store.upsert_summary(
                    &conversation_id,
                    &first.sender_id,
                    &first.recipient_id,
                    None,
                    None,
                ) {
                    tracing::warn!(%e, conversation_id = %conversation_id, "summary create failed");
                }
            }
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(%e, conversation_id = %conversation_id, "summary lookup failed");
            }
        }

        let inserted = merge::merge_batch(&self.store, &conversation_id, &records);
        if inserted.is_empty() {
            return;
        }
        self.on_batch_merged(&conversation_id, &inserted);
        self.emit_update(EngineUpdate::ConversationSynced {
            conversation_id: conversation_id.clone(),
        });
        self.emit_update(EngineUpdate::ConversationListChanged);
    }
}
