// ABOUTME: Real-time event dispatch core for a chat bot SDK
// ABOUTME: Chats, the chat directory, the datafeed poller, and the event dispatcher

pub mod backoff;
pub mod chat;
pub mod chat_service;
pub mod config;
pub mod datafeed;
pub mod dispatch;
pub mod error;
pub mod listeners;
pub mod metrics;
pub mod paths;
pub mod testing;
pub mod traits;

pub use backoff::{BackoffConfig, BackoffState};
pub use chat::{Chat, DeliveryReport};
pub use chat_service::ChatService;
pub use config::Config;
pub use datafeed::{DatafeedPoller, PollerConfig, PollerState};
pub use dispatch::Dispatcher;
pub use error::{BackendError, ChatServiceError, ListenerError, PollerError};

// Re-export core traits for convenient access
pub use traits::{
    // Backend seam
    MessagingBackend, IdentityResolver, StaticIdentityResolver, EventHandler,
    // Observers
    ChatListener, ChatServiceListener,
    // Data Types
    ChatMessage, ChatUser, FeedBatch, FeedCursor, FeedEvent, StreamType,
};
