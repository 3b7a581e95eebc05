//! The remote realtime append log, treated as a black box: one-shot reads,
//! appends with log-assigned ids, and per-conversation live subscriptions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::EngineError;
use crate::state::RemoteRecord;

/// Opaque handle for one live subscription. Returned by
/// [`RemoteMessageLog::subscribe`]; pass it back to `unsubscribe`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub(crate) id: u64,
    pub(crate) conversation_id: String,
}

/// Append-only remote store keyed by conversation id.
///
/// Transport failures reject with [`EngineError::Transport`]; the engine
/// treats every rejection as "no data this pass" and degrades to local
/// history, never distinguishing timeout from permanent error.
#[async_trait]
pub trait RemoteMessageLog: Send + Sync + 'static {
    /// Top-level conversation index, bounded by what the store exposes.
    async fn conversation_ids(&self) -> Result<Vec<String>, EngineError>;

    /// One-shot full read of a conversation's records. May be empty.
    async fn read_all(&self, conversation_id: &str) -> Result<Vec<RemoteRecord>, EngineError>;

    /// Append a record, assigning it a unique id. The stored record embeds
    /// the assigned id so later reads are self-describing.
    async fn append(
        &self,
        conversation_id: &str,
        record: RemoteRecord,
    ) -> Result<String, EngineError>;

    /// Register a live listener: every record appended to the conversation
    /// after this call is pushed into `sink`, including the caller's own
    /// appends.
    async fn subscribe(
        &self,
        conversation_id: &str,
        sink: flume::Sender<RemoteRecord>,
    ) -> Result<RemoteSubscription, EngineError>;

    /// Idempotent: tearing down an unknown or already-removed handle is a
    /// no-op.
    async fn unsubscribe(&self, subscription: &RemoteSubscription);
}

#[derive(Default)]
struct Inner {
    logs: BTreeMap<String, Vec<RemoteRecord>>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription_id: u64,
}

struct Subscriber {
    conversation_id: String,
    sink: flume::Sender<RemoteRecord>,
}

/// In-memory remote log with per-conversation subscriber fan-out.
///
/// Non-persistent; the production deployment points the engine at the real
/// realtime backend instead. The `offline` switch makes every transport call
/// fail deterministically, which is how the degraded paths are tested.
#[derive(Default)]
pub struct MemoryRemoteLog {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl MemoryRemoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every subsequent transport call to fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live subscribers attached to a conversation. Lets tests
    /// wait for the subscription to attach before appending.
    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.inner
            .read()
            .subscribers
            .values()
            .filter(|s| s.conversation_id == conversation_id)
            .count()
    }

    fn check_online(&self) -> Result<(), EngineError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(EngineError::transport("remote log is offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteMessageLog for MemoryRemoteLog {
    async fn conversation_ids(&self) -> Result<Vec<String>, EngineError> {
        self.check_online()?;
        Ok(self.inner.read().logs.keys().cloned().collect())
    }

    async fn read_all(&self, conversation_id: &str) -> Result<Vec<RemoteRecord>, EngineError> {
        self.check_online()?;
        Ok(self
            .inner
            .read()
            .logs
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        conversation_id: &str,
        mut record: RemoteRecord,
    ) -> Result<String, EngineError> {
        self.check_online()?;
        let remote_id = Uuid::new_v4().to_string();
        record.remote_id = Some(remote_id.clone());
        record.conversation_id = conversation_id.to_string();

        let sinks: Vec<(u64, flume::Sender<RemoteRecord>)> = {
            let mut inner = self.inner.write();
            inner
                .logs
                .entry(conversation_id.to_string())
                .or_default()
                .push(record.clone());
            inner
                .subscribers
                .iter()
                .filter(|(_, s)| s.conversation_id == conversation_id)
                .map(|(id, s)| (*id, s.sink.clone()))
                .collect()
        };

        // Fan out after dropping the lock; prune listeners whose receiving
        // side has gone away.
        let mut dead = Vec::new();
        for (id, sink) in sinks {
            if sink.send(record.clone()).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut inner = self.inner.write();
            for id in dead {
                inner.subscribers.remove(&id);
            }
        }

        Ok(remote_id)
    }

    async fn subscribe(
        &self,
        conversation_id: &str,
        sink: flume::Sender<RemoteRecord>,
    ) -> Result<RemoteSubscription, EngineError> {
        self.check_online()?;
        let mut inner = self.inner.write();
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        inner.subscribers.insert(
            id,
            Subscriber {
                conversation_id: conversation_id.to_string(),
                sink,
            },
        );
        Ok(RemoteSubscription {
            id,
            conversation_id: conversation_id.to_string(),
        })
    }

    async fn unsubscribe(&self, subscription: &RemoteSubscription) {
        self.inner.write().subscribers.remove(&subscription.id);
    }
}
