// ABOUTME: Tests for the dispatcher - message routing and room membership events
// ABOUTME: Verifies join/leave updates participants and the bot leaving removes the chat

use std::sync::Arc;

use symphony_core::testing::{RecordingChatServiceListener, RecordingListener};
use symphony_core::{
    Chat, ChatMessage, ChatService, ChatUser, Dispatcher, EventHandler, FeedEvent,
    StaticIdentityResolver,
};

fn bot() -> ChatUser {
    ChatUser::with_name("9000", "Bot")
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(ChatService::new(
        bot(),
        Arc::new(StaticIdentityResolver),
    )))
}

fn joined(stream: &str, user: &str) -> FeedEvent {
    FeedEvent::UserJoinedRoom {
        stream_id: stream.to_string(),
        user: ChatUser::new(user),
    }
}

fn left(stream: &str, user: &str) -> FeedEvent {
    FeedEvent::UserLeftRoom {
        stream_id: stream.to_string(),
        user: ChatUser::new(user),
    }
}

#[tokio::test]
async fn test_message_reaches_chat_listener() {
    let dispatcher = dispatcher();
    let chat = Arc::new(Chat::new("S1"));
    let listener = RecordingListener::new();
    chat.register_listener(listener.clone());
    dispatcher.chat_service().add_chat(chat).unwrap();

    dispatcher
        .handle_event(FeedEvent::MessageSent {
            message: ChatMessage::new("m1", "S1", "1001", "hello"),
        })
        .await;

    assert_eq!(listener.message_ids(), vec!["m1"]);
}

#[tokio::test]
async fn test_join_and_leave_update_participants() {
    let dispatcher = dispatcher();
    dispatcher
        .chat_service()
        .add_chat(Arc::new(Chat::new("R1")))
        .unwrap();

    dispatcher.dispatch(joined("R1", "1001")).await;
    dispatcher.dispatch(joined("R1", "1002")).await;
    let chat = dispatcher.chat_service().get_chat_by_stream("R1").unwrap();
    assert!(chat.has_remote_user("1001"));
    assert!(chat.has_remote_user("1002"));

    dispatcher.dispatch(left("R1", "1001")).await;
    assert!(!chat.has_remote_user("1001"));
    assert!(chat.has_remote_user("1002"));
    assert_eq!(dispatcher.chat_service().len(), 1);
}

#[tokio::test]
async fn test_bot_join_is_not_a_remote_participant() {
    let dispatcher = dispatcher();
    dispatcher
        .chat_service()
        .add_chat(Arc::new(Chat::new("R1")))
        .unwrap();

    dispatcher.dispatch(joined("R1", "9000")).await;

    let chat = dispatcher.chat_service().get_chat_by_stream("R1").unwrap();
    assert!(chat.remote_users().is_empty());
}

#[tokio::test]
async fn test_bot_leaving_removes_chat() {
    let dispatcher = dispatcher();
    let observer = RecordingChatServiceListener::new();
    dispatcher.chat_service().add_listener(observer.clone());
    dispatcher
        .chat_service()
        .add_chat(Arc::new(Chat::new("R1")))
        .unwrap();

    dispatcher.dispatch(left("R1", "9000")).await;

    assert!(dispatcher.chat_service().get_chat_by_stream("R1").is_none());
    assert_eq!(observer.removed(), vec!["R1"]);
}

#[tokio::test]
async fn test_membership_events_for_unknown_streams_are_ignored() {
    let dispatcher = dispatcher();

    dispatcher.dispatch(joined("R9", "1001")).await;
    dispatcher.dispatch(left("R9", "1001")).await;
    dispatcher.dispatch(left("R9", "9000")).await;
    dispatcher
        .dispatch(FeedEvent::Other {
            kind: "room_updated".to_string(),
        })
        .await;

    assert!(dispatcher.chat_service().is_empty());
}
