// Read flags + unread counters.

use super::*;

impl EngineCore {
    pub(super) fn view_open_on(&self, conversation_id: &str) -> bool {
        self.open_view.as_deref() == Some(conversation_id)
    }

    /// Screen entry: bulk-flip everything addressed to the viewer and zero
    /// their counter. Best-effort; a failure here is retried on next open.
    pub(super) fn on_conversation_opened(&mut self, conversation_id: &str) {
        let viewer = self.viewer_id.clone();
        match self.store.mark_read(conversation_id, &viewer) {
            Ok(flipped) if flipped > 0 => {
                tracing::debug!(conversation_id, flipped, "marked history read on open");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%e, conversation_id, "mark-read failed; retried on next open");
            }
        }
        if let Err(e) = self.store.zero_unread(conversation_id, &viewer) {
            tracing::warn!(%e, conversation_id, "unread reset failed");
        }
    }

    /// A message just became visible (fresh live record or outbound send):
    /// patch read state and counters, move the preview, notify the UI.
    pub(super) fn on_delivered(&mut self, mut message: Message) {
        let conversation_id = message.conversation_id.clone();
        if message.recipient_id == self.viewer_id && self.view_open_on(&conversation_id) {
            // Viewer is looking at the conversation: read immediately,
            // fire-and-forget against the store.
            match self.store.mark_read(&conversation_id, &self.viewer_id) {
                Ok(_) => message.read = true,
                Err(e) => tracing::warn!(%e, conversation_id = %conversation_id, "immediate mark-read failed"),
            }
            if let Err(e) = self.store.zero_unread(&conversation_id, &self.viewer_id) {
                tracing::warn!(%e, conversation_id = %conversation_id, "unread reset failed");
            }
        } else if let Err(e) = self
            .store
            .bump_unread(&conversation_id, &message.recipient_id)
        {
            tracing::warn!(%e, conversation_id = %conversation_id, "unread bump failed");
        }

        if let Err(e) = self.store.patch_summary_last_message(
            &conversation_id,
            &message.body,
            message.sent_at_epoch_ms,
        ) {
            tracing::warn!(%e, conversation_id = %conversation_id, "summary patch failed");
        }

        self.emit_update(EngineUpdate::MessageArrived(message));
        self.emit_update(EngineUpdate::ConversationListChanged);
    }

    /// Counter/preview maintenance for rows applied by a bulk merge. Bulk
    /// rows are not delivered through `MessageArrived`; the UI re-reads
    /// history off the `ConversationSynced` signal instead.
    pub(super) fn on_batch_merged(&mut self, conversation_id: &str, inserted: &[Message]) {
        let view_open = self.view_open_on(conversation_id);
        for message in inserted {
            if message.recipient_id == self.viewer_id && view_open {
                continue;
            }
            if let Err(e) = self.store.bump_unread(conversation_id, &message.recipient_id) {
                tracing::warn!(%e, conversation_id, "unread bump failed");
            }
        }
        if view_open {
            self.on_conversation_opened(conversation_id);
        }
        if let Some(last) = inserted.iter().max_by_key(|m| m.sent_at_epoch_ms) {
            if let Err(e) =
                self.store
                    .patch_summary_last_message(conversation_id, &last.body, last.sent_at_epoch_ms)
            {
                tracing::warn!(%e, conversation_id, "summary patch failed");
            }
        }
    }
}
