// Outbound sends: optimistic local-first write, then the remote leg.

use super::*;

impl EngineCore {
    /// Validate, persist locally (so the UI renders immediately), then append
    /// to the remote log in the background. The returned message is the
    /// single source of truth; the UI must not insert its own optimistic
    /// copy.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn handle_send(
        &mut self,
        conversation_id: String,
        sender_id: String,
        sender_role: String,
        recipient_id: String,
        recipient_role: String,
        body: String,
    ) -> Result<Message, EngineError> {
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(EngineError::validation("message body is empty"));
        }
        if conversation_id.is_empty() || sender_id.is_empty() || recipient_id.is_empty() {
            return Err(EngineError::validation(
                "conversation and participant identifiers must be non-empty",
            ));
        }

        let sent_at_epoch_ms = self.next_outgoing_ms();
        let record = RemoteRecord {
            remote_id: None,
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            sender_role,
            recipient_id: recipient_id.clone(),
            recipient_role,
            body: body.clone(),
            kind: MessageKind::Text,
            sent_at: iso_from_epoch_ms(sent_at_epoch_ms),
            sent_at_epoch_ms,
            read: false,
        };

        let message = self.store.insert(&record)?;

        // Summary is patched regardless of how the remote leg goes.
        if let Err(e) = self.store.upsert_summary(
            &conversation_id,
            &sender_id,
            &recipient_id,
            Some(&body),
            Some(sent_at_epoch_ms),
        ) {
            tracing::warn!(%e, conversation_id = %conversation_id, "summary upsert failed");
        }
        if !(recipient_id == self.viewer_id && self.view_open_on(&conversation_id)) {
            if let Err(e) = self.store.bump_unread(&conversation_id, &recipient_id) {
                tracing::warn!(%e, conversation_id = %conversation_id, "unread bump failed");
            }
        }

        self.emit_update(EngineUpdate::MessageArrived(message.clone()));
        self.emit_update(EngineUpdate::ConversationListChanged);

        if !self.network_enabled() {
            tracing::debug!(conversation_id = %conversation_id, "network disabled; message kept local only");
            return Ok(message);
        }

        let remote = self.remote.clone();
        let core_tx = self.core_sender.clone();
        let local_id = message.local_id;
        let conversation = conversation_id.clone();
        self.runtime.spawn(async move {
            let result = remote.append(&conversation, record).await;
            let _ = core_tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::RemoteAppendResult {
                    conversation_id: conversation,
                    local_id,
                    result,
                },
            )));
        });

        Ok(message)
    }

    /// Epoch-ms timestamps are author-assigned; rapid sends can share a
    /// millisecond. Keep outgoing timestamps strictly monotonic so ordering
    /// never depends on tie-breaking.
    fn next_outgoing_ms(&mut self) -> i64 {
        let now = now_epoch_ms();
        if now <= self.last_outgoing_ms {
            self.last_outgoing_ms += 1;
        } else {
            self.last_outgoing_ms = now;
        }
        self.last_outgoing_ms
    }

    pub(super) fn handle_append_result(
        &mut self,
        conversation_id: String,
        local_id: i64,
        result: Result<String, EngineError>,
    ) {
        match result {
            Ok(remote_id) => {
                // The echo through the live subscription may have backfilled
                // already; the store keeps whichever id landed first.
                if let Err(e) = self.store.backfill_remote_id(local_id, &remote_id) {
                    tracing::warn!(%e, local_id, %remote_id, "remote id backfill failed");
                }
            }
            Err(e) => {
                // At-least-once only while this process lives: the message
                // stays visible locally and is not retried here.
                tracing::warn!(%e, conversation_id = %conversation_id, local_id, "remote append failed; message remains local");
                self.emit_update(EngineUpdate::SendFailed {
                    conversation_id,
                    local_id,
                    reason: e.to_string(),
                });
            }
        }
    }
}
