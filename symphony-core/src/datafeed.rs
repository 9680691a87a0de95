// ABOUTME: Long-running datafeed poller: reads event batches and dispatches them in order
// ABOUTME: Backs off on transient errors, restarts from the tip on a rejected cursor, stops on fatal errors

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffConfig, BackoffState};
use crate::error::{BackendError, PollerError};
use crate::metrics;
use crate::traits::{EventHandler, FeedBatch, FeedCursor, MessagingBackend};

/// Tuning values for the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Upper bound on events per read
    pub max_batch_size: usize,
    /// How long one read may block when nothing is pending
    pub read_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            read_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Observable poller lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
    /// Waiting `delay` before retry number `attempt`
    Backoff { attempt: u32, delay: Duration },
    /// Stopped on an unrecoverable error; needs re-authentication or restart
    Failed { reason: String },
}

struct RunningPoller {
    stop: CancellationToken,
    task: JoinHandle<Result<(), PollerError>>,
}

/// Datafeed poller.
///
/// One task reads batches from the backend and hands each event to the
/// handler, strictly in backend order, before reading again. Handlers run on
/// the poller task, so a slow handler delays the next read.
///
/// Delivery is at-least-once: the cursor only moves past a batch after every
/// event in it has been handed to the handler, and a stop request never
/// interrupts a batch that has already been fetched.
pub struct DatafeedPoller {
    feed: Arc<FeedLoop>,
    running: tokio::sync::Mutex<Option<RunningPoller>>,
}

impl DatafeedPoller {
    pub fn new(
        backend: Arc<dyn MessagingBackend>,
        handler: Arc<dyn EventHandler>,
        config: PollerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(PollerState::Stopped);
        Self {
            feed: Arc::new(FeedLoop {
                backend,
                handler,
                config,
                state_tx,
                cursor: Mutex::new(None),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Resume from a previously saved cursor instead of the backend tip
    pub fn with_cursor(self, cursor: FeedCursor) -> Self {
        self.feed.set_cursor(Some(cursor));
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.feed.config
    }

    /// Cursor that will be sent on the next read
    pub fn cursor(&self) -> Option<FeedCursor> {
        self.feed.cursor()
    }

    pub fn state(&self) -> PollerState {
        self.feed.state_tx.borrow().clone()
    }

    /// Subscribe to state changes; a `Failed` state signals a fatal stop
    pub fn status(&self) -> watch::Receiver<PollerState> {
        self.feed.state_tx.subscribe()
    }

    /// Spawn the poll loop on the current tokio runtime.
    pub async fn start(&self) -> Result<(), PollerError> {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.as_ref() {
            if !running.task.is_finished() {
                return Err(PollerError::AlreadyRunning);
            }
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let feed = Arc::clone(&self.feed);
        let task = tokio::spawn(async move { feed.run(token).await });

        *guard = Some(RunningPoller { stop, task });
        Ok(())
    }

    /// Request a cooperative stop and wait for the loop to exit.
    ///
    /// A blocked read is abandoned; a batch already fetched is dispatched in
    /// full first. Returns the loop's outcome, so a poller that had already
    /// failed reports its fatal error here.
    pub async fn stop(&self) -> Result<(), PollerError> {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return Err(PollerError::NotRunning);
        };

        running.stop.cancel();
        match running.task.await {
            Ok(result) => result,
            Err(e) => {
                self.feed.set_state(PollerState::Failed {
                    reason: e.to_string(),
                });
                Err(PollerError::TaskPanicked(e.to_string()))
            }
        }
    }

    /// Run the loop on the caller's task until `cancel` fires or a terminal error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PollerError> {
        self.feed.run(cancel).await
    }
}

struct FeedLoop {
    backend: Arc<dyn MessagingBackend>,
    handler: Arc<dyn EventHandler>,
    config: PollerConfig,
    state_tx: watch::Sender<PollerState>,
    cursor: Mutex<Option<FeedCursor>>,
}

impl FeedLoop {
    fn cursor(&self) -> Option<FeedCursor> {
        self.cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_cursor(&self, cursor: Option<FeedCursor>) {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = cursor;
    }

    fn set_state(&self, state: PollerState) {
        self.state_tx.send_replace(state);
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), PollerError> {
        self.set_state(PollerState::Running);
        metrics::set_poller_running(true);
        tracing::info!(
            backend = %self.backend.backend_id(),
            max_batch_size = self.config.max_batch_size,
            read_timeout_ms = self.config.read_timeout.as_millis() as u64,
            "Datafeed poller started"
        );

        let result = self.poll_until_stopped(&cancel).await;

        metrics::set_poller_running(false);
        match &result {
            Ok(()) => {
                self.set_state(PollerState::Stopped);
                tracing::info!("Datafeed poller stopped");
            }
            Err(e) => {
                self.set_state(PollerState::Failed {
                    reason: e.to_string(),
                });
                tracing::error!(error = %e, "Datafeed poller terminated");
            }
        }
        result
    }

    async fn poll_until_stopped(&self, cancel: &CancellationToken) -> Result<(), PollerError> {
        let mut backoff = BackoffState::new(self.config.backoff.clone());

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let cursor = self.cursor();
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                result = self.backend.fetch_events(
                    cursor.as_ref(),
                    self.config.max_batch_size,
                    self.config.read_timeout,
                ) => result,
            };

            match fetched {
                Ok(batch) => {
                    if backoff.consecutive_failures() > 0 {
                        tracing::info!(
                            failures = backoff.consecutive_failures(),
                            "Datafeed recovered after transient failures"
                        );
                    }
                    backoff.record_success();
                    metrics::record_batch(batch.events.len());
                    self.dispatch_batch(batch).await;
                }
                Err(BackendError::InvalidCursor { cursor: rejected }) => {
                    metrics::record_cursor_reset();
                    tracing::warn!(
                        cursor = ?rejected,
                        "Datafeed cursor rejected, restarting from the current tip"
                    );
                    self.set_cursor(None);
                }
                Err(e @ BackendError::Fatal { .. }) => {
                    return Err(PollerError::Fatal(e));
                }
                Err(e) => {
                    metrics::record_transient_error();
                    let Some(delay) = backoff.record_failure_with_hint(e.retry_after()) else {
                        return Err(PollerError::RetriesExhausted {
                            attempts: backoff.consecutive_failures(),
                            last: e,
                        });
                    };
                    let attempt = backoff.consecutive_failures();
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Datafeed read failed, backing off"
                    );

                    self.set_state(PollerState::Backoff { attempt, delay });
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(PollerState::Running);
                }
            }
        }
    }

    async fn dispatch_batch(&self, batch: FeedBatch) {
        let FeedBatch {
            events,
            next_cursor,
        } = batch;

        if !events.is_empty() {
            tracing::debug!(events = events.len(), "Dispatching datafeed batch");
        }
        for event in events {
            self.handler.handle_event(event).await;
        }

        if let Some(next) = next_cursor {
            self.set_cursor(Some(next));
        }
    }
}
