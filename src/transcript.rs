// ABOUTME: Chat listener that logs each delivered message and appends it to a per-stream JSONL file
// ABOUTME: Also provides a directory observer that subscribes the transcript to every new chat

use std::fmt::Write as _;
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use symphony_core::{Chat, ChatListener, ChatMessage, ChatServiceListener};

/// One transcript line
#[derive(Debug, Serialize)]
pub struct TranscriptEntry {
    /// When the message was recorded (RFC 3339)
    pub recorded_at: String,
    /// When the message was sent, if the backend supplied a timestamp (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    pub stream_id: String,
    pub message_id: String,
    pub from_user_id: String,
    pub body: String,
}

impl TranscriptEntry {
    pub fn from_message(message: &ChatMessage) -> Self {
        let sent_at = if message.timestamp > 0 {
            chrono::DateTime::<chrono::Utc>::from_timestamp_millis(message.timestamp)
                .map(|t| t.to_rfc3339())
        } else {
            None
        };
        Self {
            recorded_at: chrono::Utc::now().to_rfc3339(),
            sent_at,
            stream_id: message.stream_id.clone(),
            message_id: message.message_id.clone(),
            from_user_id: message.from_user_id.clone(),
            body: message.body.clone(),
        }
    }
}

/// Records messages delivered to the chats it is registered on.
///
/// Every message is logged at info level. With a directory configured, each
/// message is also appended to `<dir>/<stream>.jsonl`.
#[derive(Debug, Default)]
pub struct TranscriptListener {
    dir: Option<PathBuf>,
}

impl TranscriptListener {
    /// Log-only transcript
    pub fn new() -> Self {
        Self { dir: None }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Transcript file for `stream_id`, if file output is enabled
    pub fn path_for(&self, stream_id: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.jsonl", file_stem(stream_id))))
    }

    fn append(&self, path: &Path, entry: &TranscriptEntry) -> Result<()> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let line = serde_json::to_string(entry).context("Failed to serialize transcript entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", line).with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Stream ids are base64 and may contain `/`, `+`, and `=`. Every byte outside
/// `[A-Za-z0-9_-]` is written as `%XX`, so distinct ids never share a file.
fn file_stem(stream_id: &str) -> String {
    let mut stem = String::with_capacity(stream_id.len());
    for byte in stream_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{:02X}", byte);
        }
    }
    stem
}

impl ChatListener for TranscriptListener {
    fn on_chat_message(&self, message: &ChatMessage) -> Result<()> {
        tracing::info!(
            stream_id = %message.stream_id,
            message_id = %message.message_id,
            from = %message.from_user_id,
            body = %message.body,
            "Message"
        );

        if let Some(path) = self.path_for(&message.stream_id) {
            self.append(&path, &TranscriptEntry::from_message(message))?;
        }
        Ok(())
    }
}

/// Directory observer that registers a transcript on every chat it is told about
pub struct TranscriptRecorder {
    transcript: Arc<TranscriptListener>,
}

impl TranscriptRecorder {
    pub fn new(transcript: Arc<TranscriptListener>) -> Self {
        Self { transcript }
    }
}

impl ChatServiceListener for TranscriptRecorder {
    fn on_new_chat(&self, chat: &Arc<Chat>) {
        tracing::info!(
            stream_id = chat.stream_id().unwrap_or_default(),
            remote_users = chat.remote_users().len(),
            "Recording new chat"
        );
        chat.register_listener(self.transcript.clone());
    }

    fn on_removed_chat(&self, chat: &Arc<Chat>) {
        tracing::info!(
            stream_id = chat.stream_id().unwrap_or_default(),
            "Stopped recording chat"
        );
    }
}
