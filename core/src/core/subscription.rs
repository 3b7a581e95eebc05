// Live subscription lifecycle: Closed -> Opening -> Live -> Closed.

use super::*;

/// At most one of these exists at a time: the listener for the conversation
/// currently on screen. A global all-conversations listener is deliberately
/// avoided to bound event volume.
pub(super) struct LiveSubscription {
    pub(super) conversation_id: String,
    /// Records older than `watermark_ms - grace_ms` are backlog: merged for
    /// completeness, never delivered to the UI.
    pub(super) watermark_ms: i64,
    /// Stamps every event from this subscription; a mismatch means the
    /// conversation was closed or switched while the event was in flight.
    pub(super) token: u64,
    /// `None` until the async subscribe resolves.
    pub(super) remote_sub: Option<RemoteSubscription>,
}

impl EngineCore {
    pub(super) fn open_live(&mut self, conversation_id: &str) {
        if let Some(live) = self.live.as_ref() {
            if live.conversation_id == conversation_id {
                return;
            }
        }
        // Switching conversations: the previous subscription goes first.
        self.close_live();

        if !self.network_enabled() {
            tracing::debug!(conversation_id, "network disabled; live subscription skipped");
            return;
        }

        self.live_token = self.live_token.wrapping_add(1);
        let token = self.live_token;
        let watermark_ms = now_epoch_ms();
        self.live = Some(LiveSubscription {
            conversation_id: conversation_id.to_string(),
            watermark_ms,
            token,
            remote_sub: None,
        });
        tracing::debug!(conversation_id, watermark_ms, "live subscription opening");

        let remote = self.remote.clone();
        let core_tx = self.core_sender.clone();
        let conversation = conversation_id.to_string();
        self.runtime.spawn(async move {
            let (tx, rx) = flume::unbounded();
            let subscription = match remote.subscribe(&conversation, tx).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(%e, conversation_id = %conversation, "live subscribe failed; local history only");
                    return;
                }
            };
            if core_tx
                .send(CoreMsg::Internal(Box::new(InternalEvent::SubscriptionOpened {
                    token,
                    subscription: subscription.clone(),
                })))
                .is_err()
            {
                remote.unsubscribe(&subscription).await;
                return;
            }
            while let Ok(record) = rx.recv_async().await {
                if core_tx
                    .send(CoreMsg::Internal(Box::new(InternalEvent::LiveRecord {
                        token,
                        record,
                    })))
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Tear down whatever is live. Safe to call with nothing open; runs on
    /// every exit path (close, switch, engine drop).
    pub(super) fn close_live(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        tracing::debug!(conversation_id = %live.conversation_id, "live subscription closing");
        if let Some(subscription) = live.remote_sub {
            let remote = self.remote.clone();
            self.runtime.spawn(async move {
                remote.unsubscribe(&subscription).await;
            });
        }
        // With `remote_sub` still pending, the SubscriptionOpened completion
        // carries a stale token and is unsubscribed on arrival.
    }

    pub(super) fn handle_subscription_opened(
        &mut self,
        token: u64,
        subscription: RemoteSubscription,
    ) {
        match self.live.as_mut() {
            Some(live) if live.token == token => {
                tracing::debug!(conversation_id = %live.conversation_id, "live subscription attached");
                live.remote_sub = Some(subscription);
            }
            _ => {
                // Closed or switched while subscribe was in flight.
                let remote = self.remote.clone();
                self.runtime.spawn(async move {
                    remote.unsubscribe(&subscription).await;
                });
            }
        }
    }

    pub(super) fn handle_live_record(&mut self, token: u64, record: RemoteRecord) {
        let (watermark_ms, conversation_id) = match self.live.as_ref() {
            Some(live) if live.token == token => {
                (live.watermark_ms, live.conversation_id.clone())
            }
            // No records accepted after close.
            _ => return,
        };

        let backlog = record.sent_at_epoch_ms < watermark_ms - self.config.grace_ms();
        let Some(message) = merge::merge_one(&self.store, &record) else {
            return;
        };

        if backlog {
            // Already covered by the reconciliation pass; keep it out of the
            // delivery callback so it is never misread as "just arrived".
            tracing::debug!(
                conversation_id = %conversation_id,
                sent_at_epoch_ms = message.sent_at_epoch_ms,
                "backlog record merged without delivery"
            );
            if let Err(e) = self.store.patch_summary_last_message(
                &conversation_id,
                &message.body,
                message.sent_at_epoch_ms,
            ) {
                tracing::warn!(%e, conversation_id = %conversation_id, "summary patch failed");
            }
            return;
        }

        self.on_delivered(message);
    }
}
