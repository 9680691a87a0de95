// ABOUTME: Messaging backend that serves datafeed events from a JSONL capture file
// ABOUTME: Cursor is the line offset of the next event; reports when the capture is drained

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use symphony_core::{BackendError, FeedBatch, FeedCursor, FeedEvent, MessagingBackend};
use tokio::sync::watch;

/// Replays a recorded datafeed.
///
/// Each non-empty line of the capture is one `FeedEvent` in its JSON form.
/// Without a cursor the replay starts at the first event. Once every event has
/// been served, reads behave like an idle long poll: they wait out the read
/// timeout and return an empty batch.
#[derive(Debug)]
pub struct ReplayBackend {
    events: Vec<FeedEvent>,
    drained_tx: watch::Sender<bool>,
}

impl ReplayBackend {
    pub fn from_events(events: Vec<FeedEvent>) -> Self {
        let (drained_tx, _) = watch::channel(false);
        Self { events, drained_tx }
    }

    /// Load a capture file, failing on the first line that is not a valid event
    pub async fn open(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read capture {}", path.display()))?;
        let events = parse_capture(&content)
            .with_context(|| format!("Invalid capture {}", path.display()))?;

        tracing::info!(path = %path.display(), events = events.len(), "Loaded datafeed capture");
        Ok(Self::from_events(events))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Flips to true once a read finds nothing left, which the poller only does
    /// after dispatching everything before it.
    pub fn drained(&self) -> watch::Receiver<bool> {
        self.drained_tx.subscribe()
    }

    fn offset(&self, cursor: Option<&FeedCursor>) -> Result<usize, BackendError> {
        let Some(cursor) = cursor else {
            return Ok(0);
        };
        match cursor.as_str().parse::<usize>() {
            Ok(offset) if offset <= self.events.len() => Ok(offset),
            _ => Err(BackendError::InvalidCursor {
                cursor: Some(cursor.to_string()),
            }),
        }
    }
}

fn parse_capture(content: &str) -> Result<Vec<FeedEvent>> {
    let mut events = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str::<FeedEvent>(line)
            .with_context(|| format!("line {}: not a datafeed event", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

#[async_trait]
impl MessagingBackend for ReplayBackend {
    async fn fetch_events(
        &self,
        cursor: Option<&FeedCursor>,
        max_batch_size: usize,
        wait: Duration,
    ) -> Result<FeedBatch, BackendError> {
        let start = self.offset(cursor)?;

        if start == self.events.len() {
            self.drained_tx.send_if_modified(|drained| !std::mem::replace(drained, true));
            tokio::time::sleep(wait).await;
            return Ok(FeedBatch::empty());
        }

        let end = start.saturating_add(max_batch_size.max(1)).min(self.events.len());
        tracing::debug!(start, end, "Serving replay batch");
        Ok(FeedBatch::new(
            self.events[start..end].to_vec(),
            Some(FeedCursor::new(end.to_string())),
        ))
    }

    fn backend_id(&self) -> &str {
        "replay"
    }
}
