mod support;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use consulta_core::{
    ChatEngine, EngineError, MemoryRemoteLog, MessageKind, Participant, RemoteMessageLog,
    RemoteRecord,
};
use support::{block_on, settle, wait_until, Collector};

fn patient(id: &str) -> Participant {
    Participant::new(id, "patient")
}

fn doctor(id: &str) -> Participant {
    Participant::new(id, "doctor")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn remote_record(sender: &str, recipient: &str, body: &str, sent_at_epoch_ms: i64) -> RemoteRecord {
    RemoteRecord {
        remote_id: None,
        conversation_id: String::new(),
        sender_id: sender.into(),
        sender_role: "doctor".into(),
        recipient_id: recipient.into(),
        recipient_role: "patient".into(),
        body: body.into(),
        kind: MessageKind::Text,
        sent_at: String::new(),
        sent_at_epoch_ms,
        read: false,
    }
}

fn engine_for(viewer: &str, remote: Arc<MemoryRemoteLog>) -> (ChatEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = ChatEngine::new(dir.path().to_str().unwrap(), viewer, remote).unwrap();
    (engine, dir)
}

// Scenario A: no prior messages anywhere.
#[test]
fn opening_a_fresh_conversation_yields_empty_history() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote);

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    assert_eq!(conversation_id, "u1_u2");
    assert!(engine.get_history(&conversation_id).is_empty());
}

#[test]
fn conversation_id_is_order_independent_at_the_api() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote);

    let forward = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    let reverse = engine
        .open_conversation(&doctor("u2"), &patient("u1"))
        .unwrap();
    assert_eq!(forward, reverse);
}

// Scenario B: the local-first write is visible before the remote leg lands.
#[test]
fn sent_message_is_visible_immediately_and_backfills_remote_id() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote);

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    let sent = engine
        .send_message(&conversation_id, &patient("u1"), &doctor("u2"), "hola")
        .unwrap();
    assert!(sent.local_id > 0);
    assert_eq!(sent.body, "hola");
    assert!(!sent.read);

    let history = engine.get_history(&conversation_id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "hola");
    assert!(!history[0].read);
    assert_eq!(history[0].local_id, sent.local_id);

    wait_until("remote id backfilled", || {
        engine.get_history(&conversation_id)[0].remote_id.is_some()
    });
    // The subscription echo of the own write must not duplicate the row.
    settle();
    assert_eq!(engine.get_history(&conversation_id).len(), 1);
}

// Scenario C: bulk reconciliation is idempotent.
#[test]
fn reconcile_pulls_remote_history_without_duplicates() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let base = now_ms();
    for (i, body) in ["uno", "dos", "tres"].iter().enumerate() {
        block_on(remote.append("u1_u2", remote_record("u2", "u1", body, base + i as i64))).unwrap();
    }

    let (engine, _dir) = engine_for("u1", remote);
    engine.reconcile("u1");
    wait_until("remote history merged", || {
        engine.get_history("u1_u2").len() == 3
    });

    engine.reconcile("u1");
    settle();
    let history = engine.get_history("u1_u2");
    assert_eq!(history.len(), 3);
    let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["uno", "dos", "tres"]);
}

// Overlap case: the same record arrives once via read_all and once via the
// live subscription; exactly one row may exist.
#[test]
fn overlapping_live_and_bulk_delivery_inserts_once() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote.clone());
    let collector = Collector::new();
    engine.listen_for_updates(Box::new(collector.clone()));

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    wait_until("subscription attached", || {
        remote.subscriber_count("u1_u2") == 1
    });
    settle();

    block_on(remote.append("u1_u2", remote_record("u2", "u1", "hola", now_ms()))).unwrap();
    wait_until("live record merged", || {
        engine.get_history(&conversation_id).len() == 1
    });

    engine.reconcile("u1");
    settle();
    assert_eq!(engine.get_history(&conversation_id).len(), 1);
    assert_eq!(collector.arrivals_of("hola"), 1);
}

// Scenario D: a record well behind the watermark is merged for completeness
// but never surfaces through the delivery callback.
#[test]
fn backlog_record_is_merged_but_not_delivered() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote.clone());
    let collector = Collector::new();
    engine.listen_for_updates(Box::new(collector.clone()));

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    wait_until("subscription attached", || {
        remote.subscriber_count("u1_u2") == 1
    });
    settle();

    let stale = remote_record("u2", "u1", "backlog", now_ms() - 10_000);
    block_on(remote.append("u1_u2", stale)).unwrap();

    wait_until("backlog record merged into storage", || {
        engine.get_history(&conversation_id).len() == 1
    });
    assert_eq!(collector.arrivals_of("backlog"), 0);
}

#[test]
fn fresh_live_record_reaches_the_listener_exactly_once() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote.clone());
    let collector = Collector::new();
    engine.listen_for_updates(Box::new(collector.clone()));

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    wait_until("subscription attached", || {
        remote.subscriber_count("u1_u2") == 1
    });
    settle();

    block_on(remote.append("u1_u2", remote_record("u2", "u1", "que tal", now_ms()))).unwrap();
    wait_until("live record delivered", || {
        collector.arrivals_of("que tal") > 0
    });
    settle();
    assert_eq!(collector.arrivals_of("que tal"), 1);

    // Viewer has the conversation on screen: the message lands already read
    // and the unread counter stays at zero.
    let history = engine.get_history(&conversation_id);
    assert_eq!(history.len(), 1);
    assert!(history[0].read);
    let summaries = engine.get_conversation_list("u1");
    assert_eq!(summaries[0].unread_for("u1"), 0);
}

#[test]
fn unread_counts_accumulate_for_closed_conversations() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let base = now_ms();
    block_on(remote.append("u1_u2", remote_record("u2", "u1", "primera", base))).unwrap();
    block_on(remote.append("u1_u2", remote_record("u2", "u1", "segunda", base + 1))).unwrap();

    let (engine, _dir) = engine_for("u1", remote);
    engine.reconcile("u1");
    wait_until("inbox populated", || {
        !engine.get_conversation_list("u1").is_empty()
    });
    wait_until("unread counted", || {
        engine.get_conversation_list("u1")[0].unread_for("u1") == 2
    });
    let summary = engine.get_conversation_list("u1").remove(0);
    assert_eq!(summary.conversation_id, "u1_u2");
    assert_eq!(summary.last_message_body.as_deref(), Some("segunda"));

    // Opening the conversation flips everything read and zeroes the counter.
    engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    wait_until("unread cleared on open", || {
        engine.get_conversation_list("u1")[0].unread_for("u1") == 0
    });
    wait_until("history marked read", || {
        engine.get_history("u1_u2").iter().all(|m| m.read)
    });
}

#[test]
fn offline_send_stays_local_and_warns() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote.clone());
    let collector = Collector::new();
    engine.listen_for_updates(Box::new(collector.clone()));

    remote.set_offline(true);
    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    let sent = engine
        .send_message(&conversation_id, &patient("u1"), &doctor("u2"), "sin red")
        .unwrap();
    assert!(sent.remote_id.is_none());

    wait_until("send failure surfaced", || collector.send_failures() > 0);
    let history = engine.get_history(&conversation_id);
    assert_eq!(history.len(), 1);
    assert!(history[0].remote_id.is_none());
}

#[test]
fn empty_body_is_rejected_before_any_write() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote);

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    let err = engine
        .send_message(&conversation_id, &patient("u1"), &doctor("u2"), "   ")
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(engine.get_history(&conversation_id).is_empty());
}

#[test]
fn closing_a_conversation_stops_live_delivery() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote.clone());
    let collector = Collector::new();
    engine.listen_for_updates(Box::new(collector.clone()));

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    wait_until("subscription attached", || {
        remote.subscriber_count("u1_u2") == 1
    });

    engine.close_conversation(&conversation_id);
    wait_until("subscription released", || {
        remote.subscriber_count("u1_u2") == 0
    });
    // Closing twice is fine.
    engine.close_conversation(&conversation_id);

    block_on(remote.append("u1_u2", remote_record("u2", "u1", "tarde", now_ms()))).unwrap();
    settle();
    assert!(engine.get_history(&conversation_id).is_empty());
    assert_eq!(collector.arrivals_of("tarde"), 0);

    // The next reconciliation pass picks the record up.
    engine.reconcile("u1");
    wait_until("record recovered by sync", || {
        engine.get_history(&conversation_id).len() == 1
    });
}

#[test]
fn switching_conversations_moves_the_single_subscription() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote.clone());

    engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    wait_until("first subscription attached", || {
        remote.subscriber_count("u1_u2") == 1
    });

    engine
        .open_conversation(&patient("u1"), &doctor("u3"))
        .unwrap();
    wait_until("second subscription attached", || {
        remote.subscriber_count("u1_u3") == 1
    });
    wait_until("first subscription released", || {
        remote.subscriber_count("u1_u2") == 0
    });
}

#[test]
fn outbound_send_bumps_the_recipients_counter() {
    let remote = Arc::new(MemoryRemoteLog::new());
    let (engine, _dir) = engine_for("u1", remote);

    let conversation_id = engine
        .open_conversation(&patient("u1"), &doctor("u2"))
        .unwrap();
    engine
        .send_message(&conversation_id, &patient("u1"), &doctor("u2"), "hola")
        .unwrap();

    let summary = engine.get_conversation_list("u1").remove(0);
    assert_eq!(summary.unread_for("u2"), 1);
    assert_eq!(summary.unread_for("u1"), 0);
    assert_eq!(summary.last_message_body.as_deref(), Some("hola"));
}
