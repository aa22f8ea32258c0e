mod common;

use chatsync::errors::ChatError;
use chatsync::unread::CounterTarget;
use uuid::Uuid;

use common::TestCore;

#[tokio::test]
async fn conversation_counters_increment_and_reset() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "hello").await;
    let target = CounterTarget::Conversation(conv_id.clone());

    t.core.unread.increment(&target, bob, 2).await.unwrap();
    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 3);
    assert_eq!(conversation.unread_for(alice), 0);

    t.core.unread.reset(&target, bob).await.unwrap();
    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 0);
}

#[tokio::test]
async fn group_counters_increment_and_reset() {
    let t = TestCore::new();
    let owner = t.user("Dana", "Whitfield").await;
    let member = t.user("Alice", "Nguyen").await;

    let group_id = t.group_as(owner, "Journal Club", vec![member], None).await;
    let target = CounterTarget::Group(group_id);

    t.core.unread.increment(&target, member, 5).await.unwrap();
    let group = t.core.groups.get_group(group_id).await.unwrap();
    assert_eq!(group.unread_for(member), 5);

    t.core.unread.reset(&target, member).await.unwrap();
    let group = t.core.groups.get_group(group_id).await.unwrap();
    assert_eq!(group.unread_for(member), 0);
}

#[tokio::test]
async fn non_positive_increments_are_rejected() {
    let t = TestCore::new();
    let alice = t.user("Alice", "Nguyen").await;
    let bob = t.user("Bob", "Okafor").await;

    let conv_id = t.send_as(alice, bob, "hello").await;
    let target = CounterTarget::Conversation(conv_id.clone());

    let err = t.core.unread.increment(&target, bob, 0).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    let err = t.core.unread.increment(&target, bob, -3).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    // Counts never go negative, and the rejected calls wrote nothing.
    let conversation = t.core.conversations.get(&conv_id).await.unwrap();
    assert_eq!(conversation.unread_for(bob), 1);
}

#[tokio::test]
async fn missing_targets_surface_typed_not_found() {
    let t = TestCore::new();
    let user = t.user("Alice", "Nguyen").await;

    let conversation = CounterTarget::Conversation("nonexistent".into());
    let err = t.core.unread.increment(&conversation, user, 1).await.unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound));
    let err = t.core.unread.reset(&conversation, user).await.unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound));

    let group = CounterTarget::Group(Uuid::new_v4());
    let err = t.core.unread.increment(&group, user, 1).await.unwrap_err();
    assert!(matches!(err, ChatError::GroupNotFound));
    let err = t.core.unread.reset(&group, user).await.unwrap_err();
    assert!(matches!(err, ChatError::GroupNotFound));
}
