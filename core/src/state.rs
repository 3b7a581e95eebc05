use serde::{Deserialize, Serialize};

/// Message payload classification. Anything the engine does not recognize as
/// plain text is carried as `Other` and passed through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text" => MessageKind::Text,
            _ => MessageKind::Other,
        }
    }
}

/// A conversation participant as the UI layer knows them: canonical
/// identifier plus their role in the consultation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub role: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// A message row as persisted in the local store.
///
/// Immutable once inserted except for the `remote_id` backfill after the
/// outbound remote write completes and the `read` flag, which only the
/// read-state tracker flips (false to true, never back).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the local store on insert; monotonic per store.
    pub local_id: i64,
    /// Assigned by the remote log; absent until the remote write completes.
    pub remote_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: String,
    pub recipient_id: String,
    pub recipient_role: String,
    pub body: String,
    pub kind: MessageKind,
    /// Author-assigned ISO-8601 timestamp.
    pub sent_at: String,
    /// Author-assigned epoch milliseconds; ordering and watermark key.
    pub sent_at_epoch_ms: i64,
    pub read: bool,
}

/// Self-describing record shape carried by the remote append log.
///
/// Also the input shape for local inserts: the store assigns `local_id` and
/// returns the full [`Message`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Present on records read back from the log; `None` on a fresh append
    /// (the log assigns one and embeds it in the stored record).
    pub remote_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: String,
    pub recipient_id: String,
    pub recipient_role: String,
    pub body: String,
    pub kind: MessageKind,
    pub sent_at: String,
    pub sent_at_epoch_ms: i64,
    pub read: bool,
}

/// Denormalized per-conversation row backing the inbox view. Patched on every
/// send/receive; never the source of truth for message content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub last_message_body: Option<String>,
    pub last_message_at: Option<i64>,
    pub unread_a: u32,
    pub unread_b: u32,
    pub active: bool,
}

impl ConversationSummary {
    /// Unread count for whichever side of the conversation `participant_id`
    /// is; zero for a non-participant.
    pub fn unread_for(&self, participant_id: &str) -> u32 {
        if self.participant_a == participant_id {
            self.unread_a
        } else if self.participant_b == participant_id {
            self.unread_b
        } else {
            0
        }
    }
}

pub(crate) fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn iso_from_epoch_ms(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}
