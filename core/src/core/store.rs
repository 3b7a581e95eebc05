//! Durable local cache: the message table and the denormalized
//! conversation-summary table.
//!
//! Store failures never crash the engine; callers catch and log, treating a
//! failed write as "retry on next sync pass".

use std::path::Path;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::EngineError;
use crate::state::{ConversationSummary, Message, MessageKind, RemoteRecord};

/// Characters of the body that participate in the fallback dedup key for
/// records without a remote id.
const FALLBACK_BODY_PREFIX: i64 = 32;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT UNIQUE,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    sender_role TEXT NOT NULL DEFAULT '',
    recipient_id TEXT NOT NULL,
    recipient_role TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'text',
    sent_at TEXT NOT NULL,
    sent_at_epoch_ms INTEGER NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages (conversation_id, sent_at_epoch_ms);
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    last_message_body TEXT,
    last_message_at INTEGER,
    unread_a INTEGER NOT NULL DEFAULT 0,
    unread_b INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
);";

pub(crate) struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    pub(crate) fn open(data_dir: &str, db_file: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("create data dir {data_dir}"))?;
        let path = Path::new(data_dir).join(db_file);
        let conn = Connection::open(&path)
            .with_context(|| format!("open message db {}", path.display()))?;
        conn.execute_batch(SCHEMA).context("apply message schema")?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Self { conn }
    }

    /// Persist a record, assigning its `local_id`. Constraint violations
    /// (duplicate remote id) surface as `Store` errors; dedup upstream is
    /// expected to prevent them.
    pub(crate) fn insert(&self, record: &RemoteRecord) -> Result<Message, EngineError> {
        self.conn.execute(
            "INSERT INTO messages (remote_id, conversation_id, sender_id, sender_role,
                                   recipient_id, recipient_role, body, kind,
                                   sent_at, sent_at_epoch_ms, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.remote_id,
                record.conversation_id,
                record.sender_id,
                record.sender_role,
                record.recipient_id,
                record.recipient_role,
                record.body,
                record.kind.as_str(),
                record.sent_at,
                record.sent_at_epoch_ms,
                record.read,
            ],
        )?;
        let local_id = self.conn.last_insert_rowid();
        Ok(Message {
            local_id,
            remote_id: record.remote_id.clone(),
            conversation_id: record.conversation_id.clone(),
            sender_id: record.sender_id.clone(),
            sender_role: record.sender_role.clone(),
            recipient_id: record.recipient_id.clone(),
            recipient_role: record.recipient_role.clone(),
            body: record.body.clone(),
            kind: record.kind,
            sent_at: record.sent_at.clone(),
            sent_at_epoch_ms: record.sent_at_epoch_ms,
            read: record.read,
        })
    }

    pub(crate) fn find_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Message>, EngineError> {
        let message = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE remote_id = ?1"),
                [remote_id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Fallback dedup lookup for records without a remote id:
    /// `(conversation, sent_at_epoch_ms, sender, body prefix)`.
    pub(crate) fn find_by_fallback_key(
        &self,
        record: &RemoteRecord,
    ) -> Result<Option<Message>, EngineError> {
        let message = self
            .conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                      WHERE conversation_id = ?1
                        AND sent_at_epoch_ms = ?2
                        AND sender_id = ?3
                        AND substr(body, 1, ?4) = substr(?5, 1, ?4)
                      ORDER BY local_id
                      LIMIT 1"
                ),
                params![
                    record.conversation_id,
                    record.sent_at_epoch_ms,
                    record.sender_id,
                    FALLBACK_BODY_PREFIX,
                    record.body,
                ],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// One-time patch after the outbound remote write succeeds. Rows that
    /// already carry a remote id are left untouched.
    pub(crate) fn backfill_remote_id(
        &self,
        local_id: i64,
        remote_id: &str,
    ) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE messages SET remote_id = ?2 WHERE local_id = ?1 AND remote_id IS NULL",
            params![local_id, remote_id],
        )?;
        Ok(())
    }

    /// Full ordered history: ascending `sent_at_epoch_ms`, insertion order on
    /// ties.
    pub(crate) fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, EngineError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
              WHERE conversation_id = ?1
              ORDER BY sent_at_epoch_ms ASC, local_id ASC"
        ))?;
        let rows = stmt.query_map([conversation_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip every unread message addressed to `recipient_id` in the
    /// conversation to read. Returns the number of rows flipped; the caller
    /// zeroes the matching unread counter.
    pub(crate) fn mark_read(
        &self,
        conversation_id: &str,
        recipient_id: &str,
    ) -> Result<usize, EngineError> {
        let changed = self.conn.execute(
            "UPDATE messages SET is_read = 1
              WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0",
            params![conversation_id, recipient_id],
        )?;
        Ok(changed)
    }

    // ── Conversation summaries ───────────────────────────────────────────

    /// Idempotent insert-or-update keyed by conversation id. Participants are
    /// stored sorted and never rewritten on conflict, so the unread columns
    /// keep their meaning; last-message fields only move forward.
    pub(crate) fn upsert_summary(
        &self,
        conversation_id: &str,
        participant_a: &str,
        participant_b: &str,
        last_body: Option<&str>,
        last_at: Option<i64>,
    ) -> Result<(), EngineError> {
        let (first, second) = if participant_a <= participant_b {
            (participant_a, participant_b)
        } else {
            (participant_b, participant_a)
        };
        self.conn.execute(
            "INSERT INTO conversations (conversation_id, participant_a, participant_b,
                                        last_message_body, last_message_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT(conversation_id) DO UPDATE SET
                last_message_body = COALESCE(excluded.last_message_body, last_message_body),
                last_message_at = COALESCE(excluded.last_message_at, last_message_at),
                active = 1",
            params![conversation_id, first, second, last_body, last_at],
        )?;
        Ok(())
    }

    pub(crate) fn summary_exists(&self, conversation_id: &str) -> Result<bool, EngineError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM conversations WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Move the preview forward; older timestamps never overwrite a newer
    /// preview (bulk merges can apply out of order).
    pub(crate) fn patch_summary_last_message(
        &self,
        conversation_id: &str,
        body: &str,
        at_epoch_ms: i64,
    ) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE conversations
                SET last_message_body = ?2, last_message_at = ?3
              WHERE conversation_id = ?1
                AND (last_message_at IS NULL OR last_message_at <= ?3)",
            params![conversation_id, body, at_epoch_ms],
        )?;
        Ok(())
    }

    /// Increment the unread counter on whichever side `recipient_id` is.
    pub(crate) fn bump_unread(
        &self,
        conversation_id: &str,
        recipient_id: &str,
    ) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE conversations SET
                unread_a = unread_a + (CASE WHEN participant_a = ?2 THEN 1 ELSE 0 END),
                unread_b = unread_b + (CASE WHEN participant_b = ?2 THEN 1 ELSE 0 END)
              WHERE conversation_id = ?1",
            params![conversation_id, recipient_id],
        )?;
        Ok(())
    }

    pub(crate) fn zero_unread(
        &self,
        conversation_id: &str,
        participant_id: &str,
    ) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE conversations SET
                unread_a = (CASE WHEN participant_a = ?2 THEN 0 ELSE unread_a END),
                unread_b = (CASE WHEN participant_b = ?2 THEN 0 ELSE unread_b END)
              WHERE conversation_id = ?1",
            params![conversation_id, participant_id],
        )?;
        Ok(())
    }

    /// Cold-start fallback only: recompute both counters with a full scan.
    /// The hot path maintains them incrementally.
    pub(crate) fn recount_unread(&self, conversation_id: &str) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE conversations SET
                unread_a = (SELECT COUNT(*) FROM messages
                             WHERE conversation_id = ?1
                               AND recipient_id = conversations.participant_a
                               AND is_read = 0),
                unread_b = (SELECT COUNT(*) FROM messages
                             WHERE conversation_id = ?1
                               AND recipient_id = conversations.participant_b
                               AND is_read = 0)
              WHERE conversation_id = ?1",
            [conversation_id],
        )?;
        Ok(())
    }

    /// Inbox view: every conversation the participant is part of, newest
    /// activity first.
    pub(crate) fn list_summaries(
        &self,
        participant_id: &str,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT conversation_id, participant_a, participant_b,
                    last_message_body, last_message_at, unread_a, unread_b, active
               FROM conversations
              WHERE participant_a = ?1 OR participant_b = ?1
              ORDER BY last_message_at IS NULL, last_message_at DESC",
        )?;
        let rows = stmt.query_map([participant_id], |row| {
            Ok(ConversationSummary {
                conversation_id: row.get(0)?,
                participant_a: row.get(1)?,
                participant_b: row.get(2)?,
                last_message_body: row.get(3)?,
                last_message_at: row.get(4)?,
                unread_a: row.get(5)?,
                unread_b: row.get(6)?,
                active: row.get(7)?,
            })
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

const MESSAGE_COLUMNS: &str = "local_id, remote_id, conversation_id, sender_id, sender_role, \
     recipient_id, recipient_role, body, kind, sent_at, sent_at_epoch_ms, is_read";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(8)?;
    Ok(Message {
        local_id: row.get(0)?,
        remote_id: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        sender_role: row.get(4)?,
        recipient_id: row.get(5)?,
        recipient_role: row.get(6)?,
        body: row.get(7)?,
        kind: MessageKind::parse(&kind),
        sent_at: row.get(9)?,
        sent_at_epoch_ms: row.get(10)?,
        read: row.get(11)?,
    })
}
