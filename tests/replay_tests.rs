// ABOUTME: Tests for the JSONL replay backend - batching, cursor offsets, and drain signalling
// ABOUTME: Runs a full replay through the poller, dispatcher, and transcript recorder

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use symphony::replay::ReplayBackend;
use symphony::transcript::{TranscriptListener, TranscriptRecorder};
use symphony::{
    BackendError, ChatService, ChatUser, DatafeedPoller, Dispatcher, FeedCursor, FeedEvent,
    MessagingBackend, PollerConfig, StaticIdentityResolver,
};

/// Helper to write a capture file with one event per line
fn write_capture(dir: &tempfile::TempDir, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.path().join("events.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

fn message_line(id: &str, stream: &str, from: &str, body: &str) -> String {
    format!(
        r#"{{"type":"message_sent","message":{{"message_id":"{}","stream_id":"{}","from_user_id":"{}","body":"{}","timestamp":1700000000000}}}}"#,
        id, stream, from, body
    )
}

#[tokio::test]
async fn test_batches_follow_line_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let lines = [
        message_line("m1", "S1", "1001", "one"),
        message_line("m2", "S1", "1001", "two"),
        message_line("m3", "S2", "1002", "three"),
    ];
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let backend = ReplayBackend::open(&write_capture(&dir, &refs)).await.unwrap();
    assert_eq!(backend.len(), 3);

    let wait = Duration::from_millis(10);
    let first = backend.fetch_events(None, 2, wait).await.unwrap();
    assert_eq!(first.events.len(), 2);
    assert_eq!(first.next_cursor, Some(FeedCursor::new("2")));

    let second = backend
        .fetch_events(first.next_cursor.as_ref(), 2, wait)
        .await
        .unwrap();
    assert_eq!(second.events.len(), 1);
    assert_eq!(second.events[0].stream_id(), Some("S2"));
    assert_eq!(second.next_cursor, Some(FeedCursor::new("3")));

    let drained = backend.drained();
    assert!(!*drained.borrow());
    let idle = backend
        .fetch_events(second.next_cursor.as_ref(), 2, wait)
        .await
        .unwrap();
    assert!(idle.is_empty());
    assert!(idle.next_cursor.is_none());
    assert!(*drained.borrow());
}

#[tokio::test]
async fn test_out_of_range_cursor_is_rejected() {
    let backend = ReplayBackend::from_events(vec![FeedEvent::Other {
        kind: "room_updated".to_string(),
    }]);

    let err = backend
        .fetch_events(Some(&FeedCursor::new("5")), 10, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BackendError::InvalidCursor {
            cursor: Some("5".to_string())
        }
    );
}

#[tokio::test]
async fn test_open_rejects_malformed_capture() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_capture(&dir, &[r#"{"type":"other","kind":"a"}"#, "{broken"]);

    let err = ReplayBackend::open(&path).await.unwrap_err();
    assert!(format!("{:#}", err).contains("line 2"));
}

#[tokio::test]
async fn test_open_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ReplayBackend::open(&dir.path().join("absent.jsonl"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_full_replay_writes_transcripts() {
    let dir = tempfile::tempdir().unwrap();
    let transcripts = dir.path().join("transcripts");
    let lines = [
        message_line("m1", "S1", "1001", "hello"),
        message_line("m2", "S2", "1002", "hi there"),
        r#"{"type":"user_joined_room","stream_id":"S1","user":{"id":"1003"}}"#.to_string(),
        message_line("m3", "S1", "1003", "joined"),
        r#"{"type":"user_left_room","stream_id":"S2","user":{"id":"9000"}}"#.to_string(),
    ];
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let backend = Arc::new(ReplayBackend::open(&write_capture(&dir, &refs)).await.unwrap());
    let mut drained = backend.drained();

    let chats = Arc::new(ChatService::new(
        ChatUser::new("9000"),
        Arc::new(StaticIdentityResolver),
    ));
    chats.add_listener(Arc::new(TranscriptRecorder::new(Arc::new(
        TranscriptListener::with_dir(&transcripts),
    ))));

    let config = PollerConfig {
        max_batch_size: 2,
        read_timeout: Duration::from_millis(20),
        ..PollerConfig::default()
    };
    let poller = DatafeedPoller::new(
        backend,
        Arc::new(Dispatcher::new(Arc::clone(&chats))),
        config,
    );

    poller.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), drained.wait_for(|d| *d))
        .await
        .expect("replay did not drain")
        .unwrap();
    poller.stop().await.unwrap();

    assert_eq!(poller.cursor(), Some(FeedCursor::new("5")));
    assert_eq!(chats.len(), 1, "bot left S2");
    let s1 = chats.get_chat_by_stream("S1").unwrap();
    assert!(s1.has_remote_user("1003"));

    let s1_lines = std::fs::read_to_string(transcripts.join("S1.jsonl")).unwrap();
    let ids: Vec<String> = s1_lines
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["message_id"].to_string())
        .collect();
    assert_eq!(ids, vec!["\"m1\"", "\"m3\""]);

    let s2_lines = std::fs::read_to_string(transcripts.join("S2.jsonl")).unwrap();
    assert_eq!(s2_lines.lines().count(), 1);
}
