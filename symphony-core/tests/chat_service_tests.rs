// ABOUTME: Tests for the chat directory - registration, lookup, observers, and on-demand creation
// ABOUTME: Includes first-message races that must create one chat and lose no messages

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use symphony_core::testing::{RecordingChatServiceListener, RecordingListener};
use symphony_core::{
    Chat, ChatMessage, ChatService, ChatServiceError, ChatServiceListener, ChatUser,
    IdentityResolver, StaticIdentityResolver,
};

fn bot() -> ChatUser {
    ChatUser::with_name("9000", "Bot")
}

fn service() -> ChatService {
    ChatService::new(bot(), Arc::new(StaticIdentityResolver))
}

/// Resolver that sleeps before answering and counts lookups
struct SlowResolver {
    delay: Duration,
    lookups: AtomicUsize,
}

#[async_trait]
impl IdentityResolver for SlowResolver {
    async fn resolve(&self, user_id: &str) -> Result<ChatUser> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(ChatUser::with_name(user_id, format!("User {}", user_id)))
    }
}

struct FailingResolver;

/// Observer that takes its time before subscribing a listener to a new chat
struct SlowAttach {
    delay: Duration,
    listener: Arc<RecordingListener>,
}

impl ChatServiceListener for SlowAttach {
    fn on_new_chat(&self, chat: &Arc<Chat>) {
        std::thread::sleep(self.delay);
        chat.register_listener(self.listener.clone());
    }
}

#[async_trait]
impl IdentityResolver for FailingResolver {
    async fn resolve(&self, user_id: &str) -> Result<ChatUser> {
        anyhow::bail!("directory lookup for {} failed", user_id)
    }
}

// =============================================================================
// Directory
// =============================================================================

#[test]
fn test_lookup_absent_exact_then_absent_after_remove() {
    let service = service();
    assert!(service.get_chat_by_stream("S1").is_none());

    let chat = Arc::new(Chat::new("S1").with_local_user(bot()));
    service.add_chat(chat.clone()).unwrap();

    let found = service.get_chat_by_stream("S1").unwrap();
    assert!(Arc::ptr_eq(&found, &chat));
    assert!(service.get_chat_by_stream("s1").is_none(), "lookup is exact");

    assert!(service.remove_chat(&chat));
    assert!(service.get_chat_by_stream("S1").is_none());
    assert!(!service.remove_chat(&chat));
    assert!(service.is_empty());
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let service = service();
    let first = Arc::new(Chat::new("S1"));
    service.add_chat(first.clone()).unwrap();

    let err = service.add_chat(Arc::new(Chat::new("S1"))).unwrap_err();
    assert_eq!(
        err,
        ChatServiceError::DuplicateSession {
            stream_id: "S1".to_string()
        }
    );

    let kept = service.get_chat_by_stream("S1").unwrap();
    assert!(Arc::ptr_eq(&kept, &first));
    assert_eq!(service.len(), 1);
}

// =============================================================================
// Observers
// =============================================================================

#[test]
fn test_observers_hear_add_and_remove() {
    let service = service();
    let observer = RecordingChatServiceListener::new();
    let as_dyn: Arc<dyn ChatServiceListener> = observer.clone();

    assert!(service.add_listener(as_dyn.clone()));
    assert!(!service.add_listener(as_dyn.clone()), "same observer twice");

    service.add_chat(Arc::new(Chat::new("S1"))).unwrap();
    service.remove_chat_by_stream("S1");
    assert_eq!(observer.created(), vec!["S1"]);
    assert_eq!(observer.removed(), vec!["S1"]);

    assert!(service.remove_listener(&as_dyn));
    service.add_chat(Arc::new(Chat::new("S2"))).unwrap();
    assert_eq!(observer.created(), vec!["S1"]);
}

// =============================================================================
// Message entry point
// =============================================================================

#[tokio::test]
async fn test_first_message_creates_chat_and_observer_sees_it_live() {
    let service = service();
    let messages = RecordingListener::new();
    service.add_listener(RecordingChatServiceListener::attaching(messages.clone()));

    let report = service
        .on_message(&ChatMessage::new("m1", "S1", "1001", "hi"))
        .await;

    assert_eq!(report.delivered, 1);
    assert_eq!(messages.message_ids(), vec!["m1"]);

    let chat = service.get_chat_by_stream("S1").unwrap();
    assert_eq!(chat.local_user(), Some(bot()));
    assert!(chat.has_remote_user("1001"));
}

#[tokio::test]
async fn test_messages_are_isolated_per_stream() {
    let service = service();
    service
        .on_message(&ChatMessage::new("m1", "S1", "1001", "for S1"))
        .await;
    service
        .on_message(&ChatMessage::new("m2", "S2", "1002", "for S2"))
        .await;

    let s1 = service.get_chat_by_stream("S1").unwrap();
    let s2 = service.get_chat_by_stream("S2").unwrap();
    assert_eq!(s1.last_message().unwrap().message_id, "m1");
    assert_eq!(s2.last_message().unwrap().message_id, "m2");
    assert!(!s1.has_remote_user("1002"));
    assert!(!s2.has_remote_user("1001"));
}

#[tokio::test]
async fn test_resolver_failure_falls_back_to_bare_id() {
    let service = ChatService::new(bot(), Arc::new(FailingResolver));
    service
        .on_message(&ChatMessage::new("m1", "S1", "1001", "hi"))
        .await;

    let chat = service.get_chat_by_stream("S1").unwrap();
    assert!(chat.has_remote_user("1001"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_messages_create_one_chat() {
    let resolver = Arc::new(SlowResolver {
        delay: Duration::from_millis(50),
        lookups: AtomicUsize::new(0),
    });
    let service = Arc::new(ChatService::new(bot(), resolver.clone()));
    let observer = RecordingChatServiceListener::attaching(RecordingListener::new());
    let messages = RecordingListener::new();
    let attach = RecordingChatServiceListener::attaching(messages.clone());
    service.add_listener(observer.clone());
    service.add_listener(attach);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let message = ChatMessage::new(format!("m{}", i), "NEW", "1001", "race");
                service.on_message(&message).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(service.len(), 1);
    assert_eq!(observer.created(), vec!["NEW"], "exactly one chat created");
    // Every racing message reaches the listener attached by the creator's
    // observer, exactly once.
    let mut ids = messages.message_ids();
    assert_eq!(ids.len(), 8, "every message delivered");
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8, "no message delivered twice");
    assert!(resolver.lookups.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_messages_racing_creation_wait_for_observers() {
    let service = Arc::new(service());
    let messages = RecordingListener::new();
    service.add_listener(Arc::new(SlowAttach {
        delay: Duration::from_millis(200),
        listener: messages.clone(),
    }));

    let send = |id: &'static str| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .on_message(&ChatMessage::new(id, "S1", "1001", "hi"))
                .await
        })
    };

    let creator = send("m1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let followers = vec![send("m2"), send("m3")];

    creator.await.unwrap();
    for task in followers {
        task.await.unwrap();
    }

    let ids = messages.message_ids();
    assert_eq!(ids.len(), 3, "no message lost while observers attached");
    assert_eq!(ids[0], "m1", "creating message delivered first");
    let mut rest = ids[1..].to_vec();
    rest.sort();
    assert_eq!(rest, vec!["m2", "m3"]);
}
