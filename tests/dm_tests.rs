mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatsync::conversations::ConversationResolver;
use chatsync::errors::ChatError;
use chatsync::messages::sort_for_display;
use chatsync::models::{collections, Conversation, DirectMessage, MessageType};
use chatsync::store::{
    Document, DocumentStore, MemoryStore, Query, StoreResult, Subscription, WriteOp,
};
use chrono::Utc;
use uuid::Uuid;

use common::TestCore;

/// Store wrapper whose next conversation read misses, reproducing a
/// reader that raced a concurrent creator's commit.
struct StaleReadStore {
    inner: MemoryStore,
    stale_next_get: AtomicBool,
}

#[async_trait::async_trait]
impl DocumentStore for StaleReadStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        if collection == collections::CONVERSATIONS
            && self.stale_next_get.swap(false, Ordering::SeqCst)
        {
            return Ok(None);
        }
        self.inner.get(collection, id).await
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.query(query).await
    }

    async fn atomic_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        self.inner.atomic_write(ops).await
    }

    async fn watch(&self, query: Query) -> StoreResult<Subscription> {
        self.inner.watch(query).await
    }
}

#[tokio::test]
async fn resolution_is_idempotent_in_both_orders() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let first = t.core.conversations.resolve(alice, bob).await.unwrap();
    let second = t.core.conversations.resolve(bob, alice).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Conversation::pair_key(alice, bob));

    let conversation = t.core.conversations.get(&first).await.unwrap();
    assert_eq!(conversation.participants.len(), 2);
    assert!(conversation.participants.contains(&alice));
    assert!(conversation.participants.contains(&bob));
    assert_eq!(conversation.unread_for(alice), 0);
    assert_eq!(conversation.unread_for(bob), 0);
}

#[tokio::test]
async fn racing_creators_collapse_onto_one_document() {
    let store = Arc::new(StaleReadStore {
        inner: MemoryStore::new(),
        stale_next_get: AtomicBool::new(false),
    });
    let resolver = ConversationResolver::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let first = resolver.resolve(alice, bob).await.unwrap();

    // The loser's read misses the winner's insert; its own create-only
    // insert then conflicts and it adopts the existing document.
    store.stale_next_get.store(true, Ordering::SeqCst);
    let second = resolver.resolve(bob, alice).await.unwrap();
    assert_eq!(first, second);

    let docs = store
        .inner
        .query(&Query::collection(collections::CONVERSATIONS))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn self_conversation_is_rejected() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;

    let err = t.core.conversations.resolve(alice, alice).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn sends_accumulate_on_recipient_counter_only() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "one").await;
    t.send_as(alice, bob, "two").await;
    t.send_as(alice, bob, "three").await;

    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 3);
    assert_eq!(conversation.unread_for(alice), 0);
    assert_eq!(conversation.last_message, "three");

    let messages = t.core.messages.conversation_messages(&conv_id).await.unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| !m.is_read));
    assert!(messages.iter().all(|m| m.recipient_id == bob));
}

#[tokio::test]
async fn mark_read_zeroes_counter_and_flips_message_flags() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "hello").await;
    t.send_as(alice, bob, "there").await;

    t.core.messages.mark_read(&conv_id, bob).await.unwrap();

    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 0);

    let messages = t.core.messages.conversation_messages(&conv_id).await.unwrap();
    assert!(messages.iter().all(|m| m.is_read));
}

#[tokio::test]
async fn mark_read_leaves_other_participant_untouched() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "ping").await;
    t.send_as(bob, alice, "pong").await;

    t.core.messages.mark_read(&conv_id, bob).await.unwrap();

    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 0);
    assert_eq!(conversation.unread_for(alice), 1);

    // Alice's inbound message is still unread.
    let messages = t.core.messages.conversation_messages(&conv_id).await.unwrap();
    let inbound: Vec<_> = messages.iter().filter(|m| m.recipient_id == alice).collect();
    assert!(inbound.iter().all(|m| !m.is_read));
}

#[tokio::test]
async fn empty_and_whitespace_messages_are_rejected() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;
    t.sign_in(alice);

    let err = t.core.messages.send(bob, "").await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
    let err = t.core.messages.send(bob, "   \n\t ").await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));

    // Nothing was created as a side effect of the failed sends.
    let convs = t.core.conversations.conversations_for(alice).await.unwrap();
    assert!(convs.is_empty());
}

#[tokio::test]
async fn sends_to_unknown_recipients_are_rejected() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    t.sign_in(alice);

    let err = t.core.messages.send(Uuid::new_v4(), "hello").await.unwrap_err();
    assert!(matches!(err, ChatError::UserNotFound));
}

#[tokio::test]
async fn unauthenticated_send_is_rejected() {
    let t = TestCore::new();
    let bob = t.user("Bob", "Okafor").await;

    let err = t.core.messages.send(bob, "hello").await.unwrap_err();
    assert!(matches!(err, ChatError::NotAuthenticated));
}

#[tokio::test]
async fn hiding_is_per_user_and_receiving_does_not_unhide() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "hello").await;

    t.core.visibility.hide(&conv_id, bob).await.unwrap();
    let visible = t.core.visibility.visible_conversations(bob).await.unwrap();
    assert!(visible.is_empty());

    // Alice still sees it.
    let visible = t.core.visibility.visible_conversations(alice).await.unwrap();
    assert_eq!(visible.len(), 1);

    // An incoming message does not restore Bob's list, but his counter
    // still accumulates.
    t.send_as(alice, bob, "still there?").await;
    let visible = t.core.visibility.visible_conversations(bob).await.unwrap();
    assert!(visible.is_empty());
    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 2);
}

#[tokio::test]
async fn sending_unhides_for_the_sender_only() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "hello").await;
    t.core.visibility.hide(&conv_id, alice).await.unwrap();
    t.core.visibility.hide(&conv_id, bob).await.unwrap();

    t.send_as(alice, bob, "back again").await;

    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert!(conversation.is_visible_to(alice));
    assert!(!conversation.is_visible_to(bob));
}

#[tokio::test]
async fn hide_and_show_are_idempotent() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "hello").await;

    t.core.visibility.hide(&conv_id, bob).await.unwrap();
    t.core.visibility.hide(&conv_id, bob).await.unwrap();
    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.deleted_for, vec![bob]);

    t.core.visibility.show(&conv_id, bob).await.unwrap();
    t.core.visibility.show(&conv_id, bob).await.unwrap();
    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert!(conversation.deleted_for.is_empty());
}

#[tokio::test]
async fn non_participants_cannot_change_visibility() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;
    let mallory = t.user("Mallory", "Price").await;

    let conv_id = t.send_as(alice, bob, "hello").await;

    let err = t.core.visibility.hide(&conv_id, mallory).await.unwrap_err();
    assert!(matches!(err, ChatError::InsufficientPermissions));
}

#[tokio::test]
async fn visible_list_orders_by_latest_activity() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;
    let carol = t.user("Carol", "Ibrahim").await;

    let with_bob = t.send_as(alice, bob, "first").await;
    let with_carol = t.send_as(alice, carol, "second").await;

    let visible = t.core.visibility.visible_conversations(alice).await.unwrap();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[0].id, with_carol);
    assert_eq!(visible[1].id, with_bob);

    // Activity in the older thread moves it back to the top.
    t.send_as(bob, alice, "bump").await;
    let visible = t.core.visibility.visible_conversations(alice).await.unwrap();
    assert_eq!(visible[0].id, with_bob);
}

#[test]
fn display_order_breaks_timestamp_ties_by_id() {
    let now = Utc::now();
    let make = |id: Uuid| DirectMessage {
        id,
        conversation_id: "c".into(),
        sender_id: Uuid::new_v4(),
        recipient_id: Uuid::new_v4(),
        text: "x".into(),
        timestamp: now,
        is_read: false,
        message_type: MessageType::Text,
    };
    let lo = Uuid::from_u128(1);
    let hi = Uuid::from_u128(2);

    let mut messages = vec![make(hi), make(lo)];
    sort_for_display(&mut messages);
    assert_eq!(messages[0].id, lo);
    assert_eq!(messages[1].id, hi);
}
