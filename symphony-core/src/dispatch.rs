// ABOUTME: Routes decoded datafeed events to chats and the chat directory
// ABOUTME: Messages fan out to chat listeners; membership events update or remove chats

use std::sync::Arc;

use async_trait::async_trait;

use crate::chat_service::ChatService;
use crate::metrics;
use crate::traits::{ChatUser, EventHandler, FeedEvent};

/// Event handler that feeds a [`ChatService`].
///
/// Never fails: anything that goes wrong while routing a single event is logged
/// and the poller moves on to the next one.
#[derive(Clone)]
pub struct Dispatcher {
    chats: Arc<ChatService>,
}

impl Dispatcher {
    pub fn new(chats: Arc<ChatService>) -> Self {
        Self { chats }
    }

    pub fn chat_service(&self) -> &Arc<ChatService> {
        &self.chats
    }

    pub async fn dispatch(&self, event: FeedEvent) {
        metrics::record_event(event.event_type());

        match event {
            FeedEvent::MessageSent { message } => {
                tracing::debug!(
                    stream_id = %message.stream_id,
                    message_id = %message.message_id,
                    from = %message.from_user_id,
                    "Dispatching message"
                );
                self.chats.on_message(&message).await;
            }
            FeedEvent::UserJoinedRoom { stream_id, user } => {
                self.on_user_joined(&stream_id, user);
            }
            FeedEvent::UserLeftRoom { stream_id, user } => {
                self.on_user_left(&stream_id, &user);
            }
            FeedEvent::Other { kind } => {
                tracing::debug!(kind = %kind, "Ignoring datafeed event");
            }
        }
    }

    fn on_user_joined(&self, stream_id: &str, user: ChatUser) {
        if user.id == self.chats.local_user().id {
            return;
        }
        if let Some(chat) = self.chats.get_chat_by_stream(stream_id) {
            if chat.add_remote_user(user.clone()) {
                tracing::debug!(stream_id = %stream_id, user_id = %user.id, "User joined chat");
            }
        }
    }

    fn on_user_left(&self, stream_id: &str, user: &ChatUser) {
        if user.id == self.chats.local_user().id {
            if self.chats.remove_chat_by_stream(stream_id).is_some() {
                tracing::info!(stream_id = %stream_id, "Left room, chat removed");
            }
            return;
        }
        if let Some(chat) = self.chats.get_chat_by_stream(stream_id) {
            if chat.remove_remote_user(&user.id) {
                tracing::debug!(stream_id = %stream_id, user_id = %user.id, "User left chat");
            }
        }
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn handle_event(&self, event: FeedEvent) {
        self.dispatch(event).await;
    }
}
