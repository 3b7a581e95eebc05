use crate::actions::EngineAction;
use crate::error::EngineError;
use crate::remote::RemoteSubscription;
use crate::state::{ConversationSummary, Message, RemoteRecord};

/// UI-bound events emitted on the update stream.
#[derive(Debug, Clone)]
pub enum EngineUpdate {
    /// A message (sent or received) just became visible. Delivered exactly
    /// once per message; backlog records absorbed behind the watermark never
    /// appear here.
    MessageArrived(Message),
    /// A bulk reconciliation pass applied new rows for this conversation;
    /// re-query history to pick them up.
    ConversationSynced { conversation_id: String },
    /// Summaries (previews, unread counters) moved.
    ConversationListChanged,
    /// The remote leg of a send failed. Non-blocking warning: the message is
    /// already visible from the local-first write and is not retried.
    SendFailed {
        conversation_id: String,
        local_id: i64,
        reason: String,
    },
}

/// Everything entering the engine actor.
#[derive(Debug)]
pub enum CoreMsg {
    Action(EngineAction),
    Query(Box<EngineQuery>),
    Internal(Box<InternalEvent>),
}

/// Synchronous-returning API calls. Each carries a bounded(1) reply channel;
/// routing them through the actor keeps every store access single-writer.
#[derive(Debug)]
pub enum EngineQuery {
    SendMessage {
        conversation_id: String,
        sender_id: String,
        sender_role: String,
        recipient_id: String,
        recipient_role: String,
        body: String,
        reply: flume::Sender<Result<Message, EngineError>>,
    },
    History {
        conversation_id: String,
        reply: flume::Sender<Vec<Message>>,
    },
    ConversationList {
        participant_id: String,
        reply: flume::Sender<Vec<ConversationSummary>>,
    },
}

/// Completions of async remote legs, fed back into the actor. Token-tagged
/// variants are dropped when they outlive the subscription that spawned them.
#[derive(Debug)]
pub enum InternalEvent {
    /// One conversation's worth of remote records from a reconcile scan.
    ReconcileBatch {
        conversation_id: String,
        records: Vec<RemoteRecord>,
    },
    /// The live subscription attached. Stale tokens are unsubscribed on
    /// arrival instead of adopted.
    SubscriptionOpened {
        token: u64,
        subscription: RemoteSubscription,
    },
    /// A record delivered through the live subscription.
    LiveRecord {
        token: u64,
        record: RemoteRecord,
    },
    /// The remote append for an outbound message resolved.
    RemoteAppendResult {
        conversation_id: String,
        local_id: i64,
        result: Result<String, EngineError>,
    },
}
