// ABOUTME: Core data types and collaborator traits for the datafeed dispatch subsystem
// ABOUTME: Messaging backend, identity resolution, chat listeners, and event handler seams

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::chat::Chat;
use crate::error::BackendError;

// =============================================================================
// User Identity
// =============================================================================

/// Identity of a chat participant.
///
/// Two users are the same participant when their `id`s match; display name and
/// email are informational and do not take part in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUser {
    /// Platform user identifier
    pub id: String,
    /// Display name, if resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Email address, if resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
        }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(name.into()),
            email: None,
        }
    }
}

impl PartialEq for ChatUser {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChatUser {}

impl Hash for ChatUser {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// =============================================================================
// Messages and Feed Events
// =============================================================================

/// Kind of conversation a stream represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    /// 1:1 instant message
    Im,
    /// Multi-party instant message
    Mim,
    /// Named chat room
    #[default]
    Room,
    /// Wall post
    Post,
}

/// A message observed on a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend message identifier
    pub message_id: String,
    /// Stream (conversation) the message was sent to
    pub stream_id: String,
    /// Sender's user identifier
    pub from_user_id: String,
    /// Message body as delivered by the backend
    pub body: String,
    /// Milliseconds since Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub stream_type: StreamType,
}

impl ChatMessage {
    pub fn new(
        message_id: impl Into<String>,
        stream_id: impl Into<String>,
        from_user_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            stream_id: stream_id.into(),
            from_user_id: from_user_id.into(),
            body: body.into(),
            timestamp: 0,
            stream_type: StreamType::default(),
        }
    }
}

/// Events delivered by the datafeed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A message was posted to a stream
    MessageSent { message: ChatMessage },
    /// A user joined a room
    UserJoinedRoom { stream_id: String, user: ChatUser },
    /// A user left a room
    UserLeftRoom { stream_id: String, user: ChatUser },
    /// Any event kind the dispatcher does not act on
    Other { kind: String },
}

impl FeedEvent {
    /// Stream the event belongs to, if any
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::MessageSent { message } => Some(&message.stream_id),
            Self::UserJoinedRoom { stream_id, .. } | Self::UserLeftRoom { stream_id, .. } => {
                Some(stream_id)
            }
            Self::Other { .. } => None,
        }
    }

    /// Event type name for logs and metrics
    pub fn event_type(&self) -> &str {
        match self {
            Self::MessageSent { .. } => "message_sent",
            Self::UserJoinedRoom { .. } => "user_joined_room",
            Self::UserLeftRoom { .. } => "user_left_room",
            Self::Other { kind } => kind,
        }
    }
}

/// Opaque progress token issued by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedCursor(String);

impl FeedCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One datafeed read result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedBatch {
    /// Events in backend order
    pub events: Vec<FeedEvent>,
    /// Cursor to resend on the next read; `None` keeps the current one
    pub next_cursor: Option<FeedCursor>,
}

impl FeedBatch {
    pub fn new(events: Vec<FeedEvent>, next_cursor: Option<FeedCursor>) -> Self {
        Self {
            events,
            next_cursor,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// =============================================================================
// Collaborators consumed by the core
// =============================================================================

/// Remote source of datafeed events.
///
/// Implementations own credentials and transport. `fetch_events` is a long poll:
/// it may block up to `wait` when nothing is pending and must then return an
/// empty batch instead of an error. The returned future may be dropped at any
/// await point when the poller is stopped.
#[async_trait]
pub trait MessagingBackend: Send + Sync {
    async fn fetch_events(
        &self,
        cursor: Option<&FeedCursor>,
        max_batch_size: usize,
        wait: Duration,
    ) -> Result<FeedBatch, BackendError>;

    /// Backend identifier for logging (e.g., "agent-v4", "replay")
    fn backend_id(&self) -> &str {
        "backend"
    }
}

/// Resolves sender ids into participant identities
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<ChatUser>;
}

/// Resolver that performs no lookup and returns a bare identity
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticIdentityResolver;

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, user_id: &str) -> Result<ChatUser> {
        Ok(ChatUser::new(user_id))
    }
}

// =============================================================================
// Listener capabilities exposed by the core
// =============================================================================

/// Receives messages delivered to a chat.
///
/// Invoked synchronously on the poller task. Listeners must return promptly: a
/// slow listener delays the next datafeed read for every stream. Hand long work
/// off to a spawned task or channel.
pub trait ChatListener: Send + Sync {
    fn on_chat_message(&self, message: &ChatMessage) -> Result<()>;
}

impl<F> ChatListener for F
where
    F: Fn(&ChatMessage) -> Result<()> + Send + Sync,
{
    fn on_chat_message(&self, message: &ChatMessage) -> Result<()> {
        self(message)
    }
}

/// Observes chats being added to or removed from a directory
pub trait ChatServiceListener: Send + Sync {
    /// Called after a chat is registered and before any message is delivered to
    /// it; attach chat listeners here to see the first message live.
    fn on_new_chat(&self, chat: &Arc<Chat>);

    fn on_removed_chat(&self, chat: &Arc<Chat>) {
        let _ = chat;
    }
}

/// Consumes decoded feed events in order
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: FeedEvent);
}
