// ABOUTME: Chat session for one stream: participants, last message, and listener fan-out
// ABOUTME: Late subscribers get the last message replayed once; listener failures stay isolated

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use tokio::sync::watch;

use crate::error::ListenerError;
use crate::listeners::ListenerSet;
use crate::metrics;
use crate::traits::{ChatListener, ChatMessage, ChatUser};

/// Outcome of fanning a message out to a chat's listeners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// One conversation (stream) and its subscribers.
///
/// Chats are shared as `Arc<Chat>` between the directory, the dispatcher, and
/// caller code; every mutator takes `&self`.
///
/// Fan-out and listener registration are serialized per chat: a listener added
/// while another thread is delivering waits for that delivery to finish, gets
/// its replay, and only then sees live messages. The lock is re-entrant on the
/// delivering thread, so a listener may register or remove listeners (or
/// deliver) on the chat it is being called from; a listener registered that way
/// receives the in-flight message through replay rather than live.
pub struct Chat {
    stream_id: Option<String>,
    local_user: Mutex<Option<ChatUser>>,
    remote_users: Mutex<HashSet<ChatUser>>,
    last_message: Mutex<Option<ChatMessage>>,
    listeners: ListenerSet<dyn ChatListener>,
    delivery: DeliveryLock,
    // false while the directory that created this chat is still notifying observers
    ready: watch::Sender<bool>,
}

impl Chat {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self::build(Some(stream_id.into()))
    }

    /// A chat not yet bound to a stream. It cannot be registered in a
    /// directory and never compares equal to another chat.
    pub fn without_stream() -> Self {
        Self::build(None)
    }

    fn build(stream_id: Option<String>) -> Self {
        Self {
            stream_id,
            local_user: Mutex::new(None),
            remote_users: Mutex::new(HashSet::new()),
            last_message: Mutex::new(None),
            listeners: ListenerSet::new(),
            delivery: DeliveryLock::default(),
            ready: watch::Sender::new(true),
        }
    }

    pub fn with_local_user(self, user: ChatUser) -> Self {
        self.set_local_user(user);
        self
    }

    pub fn with_remote_users(self, users: impl IntoIterator<Item = ChatUser>) -> Self {
        self.set_remote_users(users.into_iter().collect());
        self
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    // -------------------------------------------------------------------------
    // Participants
    // -------------------------------------------------------------------------

    pub fn local_user(&self) -> Option<ChatUser> {
        self.local_user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_local_user(&self, user: ChatUser) {
        *self.local_user.lock().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn remote_users(&self) -> HashSet<ChatUser> {
        self.remote_users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_remote_users(&self, users: HashSet<ChatUser>) {
        *self.remote_users.lock().unwrap_or_else(|e| e.into_inner()) = users;
    }

    /// Returns false if the user was already a participant
    pub fn add_remote_user(&self, user: ChatUser) -> bool {
        self.remote_users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user)
    }

    /// Returns false if the user was not a participant
    pub fn remove_remote_user(&self, user_id: &str) -> bool {
        self.remote_users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ChatUser::new(user_id))
    }

    pub fn has_remote_user(&self, user_id: &str) -> bool {
        self.remote_users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&ChatUser::new(user_id))
    }

    // -------------------------------------------------------------------------
    // Listeners and delivery
    // -------------------------------------------------------------------------

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.last_message
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Subscribe a listener. Returns false if it was already registered.
    ///
    /// A newly added listener is immediately handed the last message seen on
    /// this chat, if any, before this call returns and before it can receive any
    /// live message.
    pub fn register_listener(&self, listener: Arc<dyn ChatListener>) -> bool {
        let _delivery = self.delivery.acquire();
        if self.listeners.contains(&listener) {
            return false;
        }

        if let Some(message) = self.last_message() {
            if let Err(e) = invoke_listener(&listener, &message) {
                metrics::record_listener_failure();
                tracing::warn!(
                    stream_id = %message.stream_id,
                    message_id = %message.message_id,
                    error = %e,
                    "Listener failed during last-message replay"
                );
            }
        }
        self.listeners.insert(listener)
    }

    /// Unsubscribe a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ChatListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Record `message` as the last message and hand it to every listener.
    ///
    /// Blocks while another thread is delivering to or registering on this chat.
    pub fn on_message(&self, message: &ChatMessage) -> DeliveryReport {
        let _delivery = self.delivery.acquire();
        *self.last_message.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.clone());
        let listeners = self.listeners.snapshot();

        let mut report = DeliveryReport::default();
        for listener in &listeners {
            match invoke_listener(listener, message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::record_listener_failure();
                    tracing::warn!(
                        stream_id = %message.stream_id,
                        message_id = %message.message_id,
                        error = %e,
                        "Chat listener failed"
                    );
                }
            }
        }

        tracing::trace!(
            stream_id = %message.stream_id,
            delivered = report.delivered,
            failed = report.failed,
            "Message fanned out"
        );
        report
    }

    // -------------------------------------------------------------------------
    // Creation gate (used by the directory)
    // -------------------------------------------------------------------------

    /// Hold back deliveries through the directory until the gate is dropped
    pub(crate) fn close_gate(self: &Arc<Self>) -> CreationGate {
        self.ready.send_replace(false);
        CreationGate {
            chat: Arc::clone(self),
        }
    }

    /// Wait until the directory has finished announcing this chat
    pub(crate) async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Reopens a chat's delivery gate when dropped, including on unwind
pub(crate) struct CreationGate {
    chat: Arc<Chat>,
}

impl Drop for CreationGate {
    fn drop(&mut self) {
        self.chat.ready.send_replace(true);
    }
}

/// Mutex that the owning thread may re-acquire
#[derive(Default)]
struct DeliveryLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

struct DeliveryGuard<'a> {
    lock: &'a DeliveryLock,
    owned: bool,
}

impl DeliveryLock {
    fn acquire(&self) -> DeliveryGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
        if *owner == Some(me) {
            return DeliveryGuard {
                lock: self,
                owned: false,
            };
        }
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(|e| e.into_inner());
        }
        *owner = Some(me);
        DeliveryGuard {
            lock: self,
            owned: true,
        }
    }
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            *self.lock.owner.lock().unwrap_or_else(|e| e.into_inner()) = None;
            self.lock.released.notify_all();
        }
    }
}

fn invoke_listener(
    listener: &Arc<dyn ChatListener>,
    message: &ChatMessage,
) -> Result<(), ListenerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.on_chat_message(message))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ListenerError::Failed(e)),
        Err(payload) => Err(ListenerError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl PartialEq for Chat {
    fn eq(&self, other: &Self) -> bool {
        match (&self.stream_id, &other.stream_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat")
            .field("stream_id", &self.stream_id)
            .field("local_user", &self.local_user())
            .field("remote_users", &self.remote_users().len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
