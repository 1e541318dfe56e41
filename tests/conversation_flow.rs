//! End-to-end flows against a real PostgreSQL database.
//!
//! Run with `DATABASE_URL=... cargo test -- --ignored`.

mod common;

use futures::future::join_all;
use marketplace_chat::{
    attachment::attachment_models::IncomingFile,
    cache::Cache,
    conversation::ConversationRepository,
    directory::{PgArticleDirectory, PgUserDirectory},
    error::AppError,
    message::{message_dto::SendMessageRequest, MessageType},
    notification::{
        channels::EmailChannel, notification_dto::NotificationListQuery,
        notification_models::ChannelKind, settings_repository::SettingsRepository, NotificationDispatcher,
    },
    reaction::reaction_models::DeliveryState,
    realtime::events::{Channel, EventKind},
};
use std::{sync::Arc, time::Duration};

fn text(content: &str) -> SendMessageRequest {
    SendMessageRequest {
        content: content.to_string(),
        reply_to_id: None,
    }
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn buyer_asks_and_seller_reads() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "buyer").await;
    let seller = common::create_user(&pool, "seller").await;
    let article = common::create_article(&pool, seller, "Road bike").await;

    let (view, created) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();
    assert!(created);
    assert_eq!(view.counterpart_id, seller);

    let (again, created) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, view.id);

    let mut seller_events = state.bus.subscribe(Channel::User(seller));
    let mut thread_events = state.bus.subscribe(Channel::Conversation(view.id));

    let sent = state
        .message_service
        .send(view.id, buyer, text("Is this <b>available</b>?"))
        .await
        .unwrap();
    assert_eq!(sent.message_type, MessageType::Text);

    let event = tokio::time::timeout(Duration::from_secs(2), seller_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventKind::NewMessage);
    assert_eq!(event.payload["unread_count"], 1);

    let event = tokio::time::timeout(Duration::from_secs(2), thread_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventKind::NewMessage);
    assert_eq!(event.scope_id, format!("conversation:{}", view.id));
    assert_eq!(event.payload["message"]["id"], sent.id);

    let seller_view = state.conversation_service.get(view.id, seller).await.unwrap();
    assert_eq!(seller_view.unread_count, 1);
    assert!(seller_view.last_message.is_some());

    let read = state.conversation_service.mark_read(view.id, seller).await.unwrap();
    assert_eq!(read.message_ids, vec![sent.id]);
    assert_eq!(read.unread_count, 0);

    let receipt = tokio::time::timeout(Duration::from_secs(2), thread_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.kind, EventKind::ReadReceipt);
    assert_eq!(receipt.payload["reader_id"], seller);

    // a second read-mark changes nothing
    let read = state.conversation_service.mark_read(view.id, seller).await.unwrap();
    assert!(read.message_ids.is_empty());
    assert_eq!(read.unread_count, 0);
    assert_eq!(common::unread_rows(&pool, view.id, seller).await, 0);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn unread_counter_matches_rows_under_concurrent_sends_and_reads() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "busy-buyer").await;
    let seller = common::create_user(&pool, "busy-seller").await;
    let article = common::create_article(&pool, seller, "Sofa").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();

    let sends = (0..20).map(|i| {
        let messages = state.message_service.clone();
        let conversation_id = view.id;
        tokio::spawn(async move { messages.send(conversation_id, buyer, text(&format!("message {}", i))).await })
    });
    let reads = (0..5).map(|_| {
        let conversations = state.conversation_service.clone();
        let conversation_id = view.id;
        tokio::spawn(async move { conversations.mark_read(conversation_id, seller).await.map(|_| ()) })
    });

    for result in join_all(sends).await {
        result.unwrap().unwrap();
    }
    for result in join_all(reads).await {
        result.unwrap().unwrap();
    }

    let seller_view = state.conversation_service.get(view.id, seller).await.unwrap();
    assert_eq!(
        seller_view.unread_count as i64,
        common::unread_rows(&pool, view.id, seller).await
    );

    state.conversation_service.mark_read(view.id, seller).await.unwrap();
    let seller_view = state.conversation_service.get(view.id, seller).await.unwrap();
    assert_eq!(seller_view.unread_count, 0);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn one_reaction_per_user_and_emoji() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "reacting-buyer").await;
    let seller = common::create_user(&pool, "reacting-seller").await;
    let article = common::create_article(&pool, seller, "Lamp").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();
    let message = state
        .message_service
        .send(view.id, buyer, text("Still for sale?"))
        .await
        .unwrap();

    state.reaction_service.add(message.id, seller, "👍").await.unwrap();
    let summary = state.reaction_service.add(message.id, seller, "👍").await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].count, 1);
    assert_eq!(summary[0].user_ids, vec![seller]);

    let summary = state.reaction_service.remove(message.id, seller, "👍").await.unwrap();
    assert!(summary.is_empty());

    let missing = state.reaction_service.remove(message.id, seller, "👍").await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    let outsider = common::create_user(&pool, "outsider").await;
    let denied = state.reaction_service.add(message.id, outsider, "👍").await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn blocked_conversation_rejects_messages_without_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "pushy-buyer").await;
    let seller = common::create_user(&pool, "tired-seller").await;
    let article = common::create_article(&pool, seller, "Guitar").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();

    state
        .conversation_service
        .block(view.id, seller, Some("spam"))
        .await
        .unwrap();

    let before = common::messages_from(&pool, view.id, buyer).await;

    let rejected = state.message_service.send(view.id, buyer, text("hello?")).await;
    assert!(matches!(rejected, Err(AppError::Forbidden(_))));
    assert_eq!(common::messages_from(&pool, view.id, buyer).await, before);

    // the buyer cannot lift the seller's block
    let unblock = state.conversation_service.unblock(view.id, buyer).await;
    assert!(unblock.is_err());

    state.conversation_service.unblock(view.id, seller).await.unwrap();
    state
        .message_service
        .send(view.id, buyer, text("sorry, one last question"))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn system_messages_reach_both_participants() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "notice-buyer").await;
    let seller = common::create_user(&pool, "notice-seller").await;
    let article = common::create_article(&pool, seller, "Desk").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();

    let notice = state
        .message_service
        .create_system_message(view.id, "This article has been sold.")
        .await
        .unwrap();
    assert!(notice.is_system);
    assert_eq!(notice.sender_id, 0);

    let buyer_view = state.conversation_service.get(view.id, buyer).await.unwrap();
    let seller_view = state.conversation_service.get(view.id, seller).await.unwrap();
    assert_eq!(buyer_view.unread_count, 1);
    assert_eq!(seller_view.unread_count, 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn seller_cannot_open_a_second_thread_with_swapped_roles() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "curious-buyer").await;
    let seller = common::create_user(&pool, "bike-seller").await;
    let stranger = common::create_user(&pool, "stranger").await;
    let article = common::create_article(&pool, seller, "Tandem").await;

    state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();

    let swapped = state.conversation_service.find_or_create(seller, article, buyer).await;
    assert!(matches!(swapped, Err(AppError::BadRequest(_))));

    // a buyer cannot name someone other than the article's seller
    let misdirected = state.conversation_service.find_or_create(buyer, article, stranger).await;
    assert!(matches!(misdirected, Err(AppError::BadRequest(_))));

    assert_eq!(common::conversations_for_article(&pool, article).await, 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn multi_read_with_a_foreign_message_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "multi-buyer").await;
    let seller = common::create_user(&pool, "multi-seller").await;
    let other_buyer = common::create_user(&pool, "other-buyer").await;
    let other_seller = common::create_user(&pool, "other-seller").await;
    let own_article = common::create_article(&pool, seller, "Kettle").await;
    let other_article = common::create_article(&pool, other_seller, "Toaster").await;

    let (own, _) = state
        .conversation_service
        .find_or_create(buyer, own_article, seller)
        .await
        .unwrap();
    let (foreign, _) = state
        .conversation_service
        .find_or_create(other_buyer, other_article, other_seller)
        .await
        .unwrap();
    let mine = state.message_service.send(own.id, buyer, text("Kettle still there?")).await.unwrap();
    let theirs = state
        .message_service
        .send(foreign.id, other_buyer, text("Toaster still there?"))
        .await
        .unwrap();

    let mut receipts = state.bus.subscribe(Channel::Conversation(own.id));
    let result = state
        .message_service
        .mark_many_read(seller, &[mine.id, theirs.id])
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    assert_eq!(common::unread_rows(&pool, own.id, seller).await, 1);
    assert_eq!(state.conversation_service.get(own.id, seller).await.unwrap().unread_count, 1);
    assert!(receipts.try_recv().is_err());

    let results = state.message_service.mark_many_read(seller, &[mine.id]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].message_ids, vec![mine.id]);
    assert_eq!(results[0].unread_count, 0);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn repeated_acknowledgements_keep_one_delivery_row() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "ack-buyer").await;
    let seller = common::create_user(&pool, "ack-seller").await;
    let article = common::create_article(&pool, seller, "Chair").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();
    let message = state.message_service.send(view.id, buyer, text("Any scratches?")).await.unwrap();

    assert_eq!(state.reaction_service.mark_delivered(&[message.id], seller).await.unwrap(), 1);
    assert_eq!(state.reaction_service.mark_delivered(&[message.id], seller).await.unwrap(), 0);
    // the sender's own acknowledgement is ignored
    assert_eq!(state.reaction_service.mark_delivered(&[message.id], buyer).await.unwrap(), 0);

    state.conversation_service.mark_read(view.id, seller).await.unwrap();
    state.conversation_service.mark_read(view.id, seller).await.unwrap();
    state.message_service.mark_many_read(seller, &[message.id]).await.unwrap();

    // delivered after read does not move the row back
    state.reaction_service.mark_delivered(&[message.id], seller).await.unwrap();

    let statuses = state.reaction_service.delivery_status(message.id, seller).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].user_id, seller);
    assert_eq!(statuses[0].status, DeliveryState::Read);
    assert_eq!(common::delivery_rows(&pool, message.id, seller).await, 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn first_question_reaches_the_seller_inbox_and_email_stays_unsent() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "inbox-buyer").await;
    let seller = common::create_user(&pool, "inbox-seller").await;
    let article = common::create_article(&pool, seller, "Road bike").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();

    let sent = state
        .message_service
        .send(view.id, buyer, text("Is this <b>available</b>?"))
        .await
        .unwrap();

    // in-app delivery runs after the send returns
    let inbox = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let page = state
                .notification_service
                .list(seller, &NotificationListQuery::default())
                .await
                .unwrap();
            if !page.data.is_empty() {
                return page;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(inbox.unread_count, 1);
    assert_eq!(inbox.data[0].body, "Is this available?");
    assert!(inbox.data[0].title.contains("Road bike"));

    // with no SMTP host the email channel reports the message as not sent
    let config = common::test_config("postgres://unused", &dir.path().to_string_lossy());
    let email_only = NotificationDispatcher::new(
        Arc::new(SettingsRepository::new(pool.clone())),
        Arc::new(PgUserDirectory::new(pool.clone())),
        Arc::new(PgArticleDirectory::new(pool.clone(), Cache::in_memory(), Duration::from_secs(60))),
        &config.app_base_url,
    )
    .with_channel(Arc::new(EmailChannel::new(&config.email_settings()).unwrap()));
    let conversation = ConversationRepository::new(pool.clone())
        .find_by_id(view.id)
        .await
        .unwrap()
        .unwrap();

    let report = email_only.on_new_message(&conversation, &sent).await.unwrap();
    assert_eq!(report.user_id, seller);
    assert!(report.delivered.is_empty());
    assert_eq!(report.skipped, vec![ChannelKind::Email]);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn oversized_upload_leaves_no_message_or_file() {
    let dir = tempfile::tempdir().unwrap();
    let (state, pool) = common::db_state(&dir.path().to_string_lossy()).await;
    let buyer = common::create_user(&pool, "upload-buyer").await;
    let seller = common::create_user(&pool, "upload-seller").await;
    let article = common::create_article(&pool, seller, "Camera").await;
    let (view, _) = state
        .conversation_service
        .find_or_create(buyer, article, seller)
        .await
        .unwrap();

    let limit = state.config.max_file_bytes as usize;
    let result = state
        .attachment_service
        .upload(
            view.id,
            buyer,
            IncomingFile {
                original_name: "datasheet.txt".to_string(),
                declared_mime: Some("text/plain".to_string()),
                bytes: vec![b'a'; limit + 1],
            },
            Some("full data sheet".to_string()),
        )
        .await;

    assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    assert_eq!(common::messages_from(&pool, view.id, buyer).await, 0);
    assert_eq!(common::files_under(dir.path()), 0);
}
