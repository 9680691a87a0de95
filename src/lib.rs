// ABOUTME: Root library module exposing the bot runtime pieces
// ABOUTME: Replay backend and transcript listener, plus re-exports of the dispatch core

pub mod replay;
pub mod transcript;

// Re-export core modules
pub use symphony_core::config;
pub use symphony_core::metrics;
pub use symphony_core::paths;
pub use symphony_core::testing;

pub use symphony_core::{
    BackendError, Chat, ChatListener, ChatMessage, ChatService, ChatServiceListener, ChatUser,
    DatafeedPoller, Dispatcher, EventHandler, FeedBatch, FeedCursor, FeedEvent,
    MessagingBackend, PollerConfig, PollerError, PollerState, StaticIdentityResolver,
};
