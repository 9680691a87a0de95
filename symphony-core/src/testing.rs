// ABOUTME: Test doubles for the dispatch subsystem: scripted backend and recording listeners
// ABOUTME: Allows deterministic poller and directory tests without a live Symphony pod
//!
//! # Example
//!
//! ```no_run
//! use symphony_core::testing::ScriptedBackend;
//! use symphony_core::{BackendError, ChatMessage, FeedBatch, FeedCursor, FeedEvent};
//!
//! let backend = ScriptedBackend::new()
//!     .then_error(BackendError::transient("502 from agent"))
//!     .then_batch(FeedBatch::new(
//!         vec![FeedEvent::MessageSent {
//!             message: ChatMessage::new("m1", "S1", "1001", "hello"),
//!         }],
//!         Some(FeedCursor::new("c1")),
//!     ));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::chat::Chat;
use crate::error::BackendError;
use crate::traits::{
    ChatListener, ChatMessage, ChatServiceListener, EventHandler, FeedBatch, FeedCursor,
    FeedEvent, MessagingBackend,
};

enum Step {
    Batch(FeedBatch),
    Error(BackendError),
}

/// Backend that replays a fixed script of reads.
///
/// Once the script is exhausted every read blocks until the caller drops it,
/// which is how an idle long poll looks to the poller.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    cursors: Mutex<Vec<Option<FeedCursor>>>,
    calls_tx: watch::Sender<usize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (calls_tx, _) = watch::channel(0);
        Self {
            script: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
            calls_tx,
        }
    }

    pub fn then_batch(self, batch: FeedBatch) -> Self {
        self.push(Step::Batch(batch));
        self
    }

    pub fn then_events(self, events: Vec<FeedEvent>, next_cursor: &str) -> Self {
        self.then_batch(FeedBatch::new(events, Some(FeedCursor::new(next_cursor))))
    }

    pub fn then_error(self, error: BackendError) -> Self {
        self.push(Step::Error(error));
        self
    }

    fn push(&self, step: Step) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
    }

    /// Cursor sent with each read so far, in call order
    pub fn cursors(&self) -> Vec<Option<FeedCursor>> {
        self.cursors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        *self.calls_tx.borrow()
    }

    /// Wait until at least `n` reads have been made
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls_tx.subscribe();
        let _ = rx.wait_for(|calls| *calls >= n).await;
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingBackend for ScriptedBackend {
    async fn fetch_events(
        &self,
        cursor: Option<&FeedCursor>,
        _max_batch_size: usize,
        _wait: Duration,
    ) -> Result<FeedBatch, BackendError> {
        self.cursors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cursor.cloned());
        self.calls_tx.send_modify(|calls| *calls += 1);

        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match step {
            Some(Step::Batch(batch)) => Ok(batch),
            Some(Step::Error(error)) => Err(error),
            None => std::future::pending().await,
        }
    }

    fn backend_id(&self) -> &str {
        "scripted"
    }
}

/// Chat listener that stores every message it receives
#[derive(Default)]
pub struct RecordingListener {
    messages: Mutex<Vec<ChatMessage>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|m| m.message_id)
            .collect()
    }
}

impl ChatListener for RecordingListener {
    fn on_chat_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

/// Directory observer that records lifecycle notifications and optionally
/// subscribes a listener to every new chat.
#[derive(Default)]
pub struct RecordingChatServiceListener {
    created: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    attach: Option<Arc<dyn ChatListener>>,
}

impl RecordingChatServiceListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Observer that registers `listener` on each chat it hears about
    pub fn attaching(listener: Arc<dyn ChatListener>) -> Arc<Self> {
        Arc::new(Self {
            attach: Some(listener),
            ..Self::default()
        })
    }

    pub fn created(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ChatServiceListener for RecordingChatServiceListener {
    fn on_new_chat(&self, chat: &Arc<Chat>) {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(chat.stream_id().unwrap_or_default().to_string());
        if let Some(listener) = &self.attach {
            chat.register_listener(Arc::clone(listener));
        }
    }

    fn on_removed_chat(&self, chat: &Arc<Chat>) {
        self.removed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(chat.stream_id().unwrap_or_default().to_string());
    }
}

/// Event handler that records events and the peak number of concurrent calls
pub struct RecordingHandler {
    events: Mutex<Vec<FeedEvent>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    count_tx: watch::Sender<usize>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Handler that sleeps for `delay` per event, to widen race windows
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(Some(delay))
    }

    fn build(delay: Option<Duration>) -> Arc<Self> {
        let (count_tx, _) = watch::channel(0);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            count_tx,
            delay,
        })
    }

    pub fn events(&self) -> Vec<FeedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Message ids of recorded `message_sent` events, in handling order
    pub fn message_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FeedEvent::MessageSent { message } => Some(message.message_id),
                _ => None,
            })
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn wait_for_events(&self, n: usize) {
        let mut rx = self.count_tx.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: FeedEvent) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.count_tx.send_modify(|count| *count += 1);
    }
}
