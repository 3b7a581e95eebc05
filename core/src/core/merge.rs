//! Idempotent merge of remote records into the local store.
//!
//! One declared dedup precedence, enforced here and nowhere else: the remote
//! id when the record carries one, then the fallback key
//! `(conversation, sent_at_epoch_ms, sender, body prefix)`. Safe to call
//! repeatedly with overlapping or fully-duplicate batches.

use crate::state::{Message, RemoteRecord};

use super::store::MessageStore;

/// Merge a batch, ascending by timestamp (not required for correctness, but
/// it keeps transient UI reordering down). Returns the newly inserted rows;
/// per-record failures are logged and retried on the next sync pass.
pub(crate) fn merge_batch(
    store: &MessageStore,
    conversation_id: &str,
    records: &[RemoteRecord],
) -> Vec<Message> {
    let mut ordered: Vec<&RemoteRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.sent_at_epoch_ms);

    let mut inserted = Vec::new();
    for record in ordered {
        if let Some(message) = merge_one(store, record) {
            inserted.push(message);
        }
    }
    if !inserted.is_empty() {
        tracing::debug!(
            conversation_id,
            applied = inserted.len(),
            total = records.len(),
            "merged remote batch"
        );
    }
    inserted
}

/// Merge a single record. Returns the inserted message, or `None` when the
/// record was already present (or could not be checked/inserted this pass).
pub(crate) fn merge_one(store: &MessageStore, record: &RemoteRecord) -> Option<Message> {
    if let Some(remote_id) = record.remote_id.as_deref() {
        match store.find_by_remote_id(remote_id) {
            Ok(Some(_)) => return None,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%e, remote_id, "dedup lookup failed; record skipped this pass");
                return None;
            }
        }
    }

    match store.find_by_fallback_key(record) {
        Ok(Some(existing)) => {
            // An own write echoed back before its append completion was
            // processed: adopt the remote id so every later delivery of this
            // record dedups on the primary key.
            if existing.remote_id.is_none() {
                if let Some(remote_id) = record.remote_id.as_deref() {
                    if let Err(e) = store.backfill_remote_id(existing.local_id, remote_id) {
                        tracing::warn!(%e, remote_id, local_id = existing.local_id, "echo backfill failed");
                    }
                }
            }
            None
        }
        Ok(None) => match store.insert(record) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(
                    %e,
                    conversation_id = %record.conversation_id,
                    "insert failed; record retried on next sync pass"
                );
                None
            }
        },
        Err(e) => {
            tracing::warn!(%e, conversation_id = %record.conversation_id, "fallback dedup lookup failed; record skipped this pass");
            None
        }
    }
}
