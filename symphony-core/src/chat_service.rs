// ABOUTME: Chat directory mapping stream ids to Chat sessions with lifecycle observers
// ABOUTME: Creates chats on demand for unseen streams via an atomic lookup-or-create

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::chat::{panic_message, Chat, CreationGate, DeliveryReport};
use crate::error::ChatServiceError;
use crate::listeners::ListenerSet;
use crate::metrics;
use crate::traits::{ChatMessage, ChatServiceListener, ChatUser, IdentityResolver};

/// Directory of active chats for one authenticated identity.
///
/// Thread-safe; share it as `Arc<ChatService>` between the dispatcher and
/// caller code. At most one `Chat` exists per stream id.
///
/// Registering a chat whose stream is already present is rejected with
/// [`ChatServiceError::DuplicateSession`] and the existing chat is kept.
pub struct ChatService {
    local_user: ChatUser,
    resolver: Arc<dyn IdentityResolver>,
    chats: DashMap<String, Arc<Chat>>,
    listeners: ListenerSet<dyn ChatServiceListener>,
}

impl ChatService {
    pub fn new(local_user: ChatUser, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            local_user,
            resolver,
            chats: DashMap::new(),
            listeners: ListenerSet::new(),
        }
    }

    /// Identity the directory's chats are created for
    pub fn local_user(&self) -> &ChatUser {
        &self.local_user
    }

    // ------------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------------

    /// Register a chat under its stream id and notify observers.
    pub fn add_chat(&self, chat: Arc<Chat>) -> Result<(), ChatServiceError> {
        let stream_id = chat
            .stream_id()
            .ok_or(ChatServiceError::MissingStream)?
            .to_string();

        match self.chats.entry(stream_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(stream_id = %stream_id, "Rejected duplicate chat registration");
                return Err(ChatServiceError::DuplicateSession { stream_id });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&chat));
            }
        }

        tracing::info!(stream_id = %stream_id, "Chat added");
        metrics::set_active_chats(self.chats.len());
        self.notify_new_chat(&chat);
        Ok(())
    }

    /// Unregister the chat for `chat`'s stream. Returns false if none was registered.
    pub fn remove_chat(&self, chat: &Chat) -> bool {
        match chat.stream_id() {
            Some(stream_id) => self.remove_chat_by_stream(stream_id).is_some(),
            None => false,
        }
    }

    /// Unregister and return the chat for `stream_id`, notifying observers.
    pub fn remove_chat_by_stream(&self, stream_id: &str) -> Option<Arc<Chat>> {
        let (_, removed) = self.chats.remove(stream_id)?;

        tracing::info!(stream_id = %stream_id, "Chat removed");
        metrics::set_active_chats(self.chats.len());
        self.notify_removed_chat(&removed);
        Some(removed)
    }

    pub fn get_chat_by_stream(&self, stream_id: &str) -> Option<Arc<Chat>> {
        self.chats.get(stream_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the chat for `stream_id`, creating it with `factory` if absent.
    ///
    /// The factory runs at most once per stream id even under concurrent calls,
    /// and must not call back into this directory. The boolean is true when this
    /// call created the chat; observers have been notified by the time it returns.
    pub fn lookup_or_create<F>(&self, stream_id: &str, factory: F) -> (Arc<Chat>, bool)
    where
        F: FnOnce() -> Chat,
    {
        let (chat, gate) = self.find_or_insert(stream_id, factory);
        (chat, gate.is_some())
    }

    /// Like `lookup_or_create`, but a newly created chat stays gated until the
    /// returned gate is dropped: `on_message` callers for the same stream wait
    /// for it, so they cannot deliver ahead of the creator's observers.
    fn find_or_insert<F>(&self, stream_id: &str, factory: F) -> (Arc<Chat>, Option<CreationGate>)
    where
        F: FnOnce() -> Chat,
    {
        let mut gate = None;
        let chat = {
            let entry = self.chats.entry(stream_id.to_string()).or_insert_with(|| {
                let chat = Arc::new(factory());
                gate = Some(chat.close_gate());
                chat
            });
            Arc::clone(entry.value())
        };

        if gate.is_some() {
            tracing::info!(stream_id = %stream_id, "Chat created for new stream");
            metrics::set_active_chats(self.chats.len());
            self.notify_new_chat(&chat);
        }
        (chat, gate)
    }

    pub fn chats(&self) -> Vec<Arc<Chat>> {
        self.chats
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Chats in which `user_id` is a remote participant
    pub fn chats_for_user(&self, user_id: &str) -> Vec<Arc<Chat>> {
        self.chats
            .iter()
            .filter(|entry| entry.value().has_remote_user(user_id))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Returns false if the observer was already registered
    pub fn add_listener(&self, listener: Arc<dyn ChatServiceListener>) -> bool {
        self.listeners.insert(listener)
    }

    /// Returns false if the observer was not registered
    pub fn remove_listener(&self, listener: &Arc<dyn ChatServiceListener>) -> bool {
        self.listeners.remove(listener)
    }

    fn notify_new_chat(&self, chat: &Arc<Chat>) {
        for listener in self.listeners.snapshot() {
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_new_chat(chat)))
            {
                metrics::record_listener_failure();
                tracing::warn!(
                    stream_id = ?chat.stream_id(),
                    error = %panic_message(payload.as_ref()),
                    "Chat service listener panicked in on_new_chat"
                );
            }
        }
    }

    fn notify_removed_chat(&self, chat: &Arc<Chat>) {
        for listener in self.listeners.snapshot() {
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_removed_chat(chat)))
            {
                metrics::record_listener_failure();
                tracing::warn!(
                    stream_id = ?chat.stream_id(),
                    error = %panic_message(payload.as_ref()),
                    "Chat service listener panicked in on_removed_chat"
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch entry point
    // ------------------------------------------------------------------------

    /// Deliver an incoming message to its chat, creating the chat first if the
    /// stream has not been seen.
    ///
    /// Observers hear about a new chat before any message is delivered to it,
    /// and the creating message is delivered before messages that raced it.
    pub async fn on_message(&self, message: &ChatMessage) -> DeliveryReport {
        if let Some(chat) = self.get_chat_by_stream(&message.stream_id) {
            chat.ready().await;
            return chat.on_message(message);
        }

        let sender = if message.from_user_id == self.local_user.id {
            None
        } else {
            Some(self.resolve_sender(&message.from_user_id).await)
        };

        let local_user = self.local_user.clone();
        let (chat, gate) = self.find_or_insert(&message.stream_id, || {
            let remote_users: HashSet<ChatUser> = sender.into_iter().collect();
            Chat::new(message.stream_id.clone())
                .with_local_user(local_user)
                .with_remote_users(remote_users)
        });

        if gate.is_none() {
            chat.ready().await;
        }
        let report = chat.on_message(message);
        drop(gate);
        report
    }

    async fn resolve_sender(&self, user_id: &str) -> ChatUser {
        match self.resolver.resolve(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to resolve sender identity, using bare id"
                );
                ChatUser::new(user_id)
            }
        }
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("local_user", &self.local_user)
            .field("chats", &self.chats.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
