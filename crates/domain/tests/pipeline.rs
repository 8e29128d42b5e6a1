mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cornerstone_domain::cdc::Op;
use cornerstone_domain::content::{Comment, ContentStatus, MediaItem, PostTags, UserProfile};
use cornerstone_domain::dispatch::Dispatcher;
use cornerstone_domain::follows::FollowDirection;
use cornerstone_domain::handlers::CdcTable;
use cornerstone_domain::interests::{InterestAction, InterestSnapshot, interest_key};
use cornerstone_domain::moderation::ModerationConfig;
use cornerstone_domain::notifications::NotificationType;
use cornerstone_domain::ports::kv::CounterStore;
use cornerstone_domain::ports::log::LogMessage;
use cornerstone_domain::ports::search::SearchIndex;
use cornerstone_domain::ports::store::{ContentRepository, InterestRepository};
use cornerstone_domain::retry::RetryPolicy;
use serde_json::json;
use support::{Harness, event, row};

fn log_message(topic: &str, payload: serde_json::Value) -> LogMessage {
    LogMessage {
        topic: topic.to_string(),
        partition: 0,
        offset: 0,
        key: None,
        payload: serde_json::to_vec(&payload).unwrap(),
    }
}

fn comment(id: u64, post_id: u64, user_id: u64) -> Comment {
    Comment {
        id,
        post_id,
        user_id,
        root_id: 0,
        parent_id: 0,
        reply_to_user: 0,
        content: "nice".into(),
        media: Vec::new(),
        status: ContentStatus::Audit,
        is_deleted: false,
        created_at: 0,
    }
}

#[tokio::test]
async fn like_insert_counts_marks_dirty_and_notifies_the_author() {
    let harness = Harness::new();
    harness.seed_post(42, 9).await;
    let dispatcher = Dispatcher::new(
        "likes",
        Arc::new(harness.handler(CdcTable::Likes)),
        RetryPolicy::default(),
    );
    let message = log_message(
        "cdc.likes",
        json!({"table": "likes", "type": "insert", "ts": 1700,
               "data": [{"user_id": "7", "post_id": "42"}]}),
    );
    dispatcher.dispatch(&message, &harness.cancel).await.unwrap();

    assert_eq!(
        CounterStore::get(&harness.kv, "post.like:42").await.unwrap(),
        Some(1)
    );
    assert_eq!(harness.kv.set_members("dirty:post").await, vec!["42"]);
    let sent = harness.notifications.all().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::PostLike);
    assert_eq!(sent[0].receiver_id, 9);
    assert_eq!(sent[0].sender_id, 7);
    assert_eq!(sent[0].content, "点赞了你的帖子");
}

#[tokio::test]
async fn liking_your_own_post_sends_nothing() {
    let harness = Harness::new();
    harness.seed_post(42, 7).await;
    harness
        .apply(
            CdcTable::Likes,
            event(CdcTable::Likes, Op::Insert, [("user_id", "7"), ("post_id", "42")], 1700),
        )
        .await
        .unwrap();
    assert_eq!(
        CounterStore::get(&harness.kv, "post.like:42").await.unwrap(),
        Some(1)
    );
    assert!(harness.notifications.all().await.is_empty());
}

#[tokio::test]
async fn self_actions_never_notify() {
    let harness = Harness::new();
    harness.seed_post(1, 5).await;
    let mut own = comment(10, 1, 5);
    own.status = ContentStatus::Published;
    harness.content.insert_comment(own).await;
    harness.content.insert_comment(comment(11, 1, 5)).await;

    harness
        .apply(
            CdcTable::Collections,
            event(CdcTable::Collections, Op::Insert, [("user_id", "5"), ("post_id", "1")], 1),
        )
        .await
        .unwrap();
    harness
        .apply(
            CdcTable::CommentLikes,
            event(
                CdcTable::CommentLikes,
                Op::Insert,
                [("user_id", "5"), ("comment_id", "10")],
                2,
            ),
        )
        .await
        .unwrap();
    harness
        .apply(
            CdcTable::PostComments,
            event(
                CdcTable::PostComments,
                Op::Insert,
                [("id", "11"), ("post_id", "1"), ("user_id", "5"), ("content", "mine")],
                3,
            ),
        )
        .await
        .unwrap();

    assert!(harness.notifications.all().await.is_empty());
}

#[tokio::test]
async fn follow_insert_fills_both_sets_and_counters() {
    let harness = Harness::new();
    harness
        .apply(
            CdcTable::UserFollows,
            event(
                CdcTable::UserFollows,
                Op::Insert,
                [
                    ("follower_id", "3"),
                    ("following_id", "5"),
                    ("created_at", "2025-01-01 00:00:00"),
                ],
                1700,
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        harness.kv.sorted_members("user:follower:5").await,
        vec![("3".to_string(), 1_735_689_600)]
    );
    assert_eq!(
        harness.kv.sorted_members("user:following:3").await,
        vec![("5".to_string(), 1_735_689_600)]
    );
    assert_eq!(
        CounterStore::get(&harness.kv, "user.follower:5").await.unwrap(),
        Some(1)
    );
    assert_eq!(
        CounterStore::get(&harness.kv, "user.following:3").await.unwrap(),
        Some(1)
    );
    assert_eq!(harness.kv.set_members("dirty:follow").await, vec!["3", "5"]);
    assert!(harness.kv.ttl("user:follower:5").await.is_some());

    let sent = harness.notifications.all().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::NewFollower);
    assert_eq!(sent[0].receiver_id, 5);
}

#[tokio::test]
async fn follower_sets_keep_the_newest_thousand() {
    let harness = Harness::new();
    for follower in 1..=1005u64 {
        let created_at = format!("2025-01-01 00:{:02}:{:02}", follower / 60, follower % 60);
        harness
            .apply(
                CdcTable::UserFollows,
                event(
                    CdcTable::UserFollows,
                    Op::Insert,
                    [
                        ("follower_id", follower.to_string().as_str()),
                        ("following_id", "5000"),
                        ("created_at", created_at.as_str()),
                    ],
                    follower as i64,
                ),
            )
            .await
            .unwrap();
    }
    let members = harness.kv.sorted_members("user:follower:5000").await;
    assert_eq!(members.len(), 1000);
    let ids: Vec<u64> = members.iter().map(|(id, _)| id.parse().unwrap()).collect();
    assert!(ids.iter().all(|id| *id > 5));
    assert_eq!(ids[0], 1005);

    let small = Harness::new();
    for follower in [11u64, 12, 13] {
        small
            .apply(
                CdcTable::UserFollows,
                event(
                    CdcTable::UserFollows,
                    Op::Insert,
                    [
                        ("follower_id", follower.to_string().as_str()),
                        ("following_id", "8"),
                    ],
                    1,
                ),
            )
            .await
            .unwrap();
    }
    let mut ids: Vec<String> = small
        .kv
        .sorted_members("user:follower:8")
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["11", "12", "13"]);
}

#[tokio::test]
async fn unfollow_removes_both_sides() {
    let harness = Harness::new();
    let pairs = [("follower_id", "3"), ("following_id", "5")];
    harness
        .apply(CdcTable::UserFollows, event(CdcTable::UserFollows, Op::Insert, pairs, 1))
        .await
        .unwrap();
    harness
        .apply(CdcTable::UserFollows, event(CdcTable::UserFollows, Op::Delete, pairs, 2))
        .await
        .unwrap();
    assert!(harness.kv.sorted_members("user:follower:5").await.is_empty());
    assert!(harness.kv.sorted_members("user:following:3").await.is_empty());
    assert_eq!(
        CounterStore::get(&harness.kv, "user.follower:5").await.unwrap(),
        Some(0)
    );
}

#[tokio::test]
async fn follow_on_an_expired_set_restores_every_stored_follower() {
    let harness = Harness::new();
    harness.content.add_follow(1, 5, 1_735_689_000).await;
    harness.content.add_follow(2, 5, 1_735_689_300).await;
    harness.content.add_follow(3, 5, 1_735_689_600).await;
    harness
        .apply(
            CdcTable::UserFollows,
            event(
                CdcTable::UserFollows,
                Op::Insert,
                [
                    ("follower_id", "3"),
                    ("following_id", "5"),
                    ("created_at", "2025-01-01 00:00:00"),
                ],
                1,
            ),
        )
        .await
        .unwrap();

    assert_eq!(harness.kv.sorted_members("user:follower:5").await.len(), 3);
    let listed = harness
        .services
        .follows
        .list(5, FollowDirection::Followers)
        .await
        .unwrap();
    assert_eq!(listed, vec![3, 2, 1]);
}

#[tokio::test]
async fn comment_soft_delete_skips_moderation_and_counters() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    let soft_delete = event(
        CdcTable::PostComments,
        Op::Update,
        [
            ("id", "99"),
            ("post_id", "1"),
            ("user_id", "4"),
            ("status", "0"),
            ("is_deleted", "1"),
        ],
        1700,
    )
    .with_before(row([("is_deleted", "0")]));
    harness.apply(CdcTable::PostComments, soft_delete).await.unwrap();

    assert_eq!(harness.text.calls.load(Ordering::SeqCst), 0);
    assert!(harness.kv.set_members("dirty:post").await.is_empty());
}

#[tokio::test]
async fn deleting_a_published_comment_takes_it_out_of_the_count() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    let soft_delete = event(
        CdcTable::PostComments,
        Op::Update,
        [
            ("id", "99"),
            ("post_id", "1"),
            ("user_id", "4"),
            ("status", "1"),
            ("is_deleted", "1"),
        ],
        1700,
    )
    .with_before(row([("is_deleted", "0")]));
    harness.apply(CdcTable::PostComments, soft_delete).await.unwrap();

    assert_eq!(harness.text.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        CounterStore::get(&harness.kv, "post.comment:1").await.unwrap(),
        Some(-1)
    );
    assert_eq!(harness.kv.set_members("dirty:post").await, vec!["1"]);
}

#[tokio::test]
async fn approved_comment_is_counted_and_notifies_with_unread_push() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    harness.content.insert_comment(comment(20, 1, 4)).await;
    harness
        .apply(
            CdcTable::PostComments,
            event(
                CdcTable::PostComments,
                Op::Insert,
                [("id", "20"), ("post_id", "1"), ("user_id", "4"), ("content", "nice")],
                1700,
            ),
        )
        .await
        .unwrap();

    let stored = harness.content.get_comment(20).await.unwrap().unwrap();
    assert_eq!(stored.status, ContentStatus::Published);
    assert_eq!(
        CounterStore::get(&harness.kv, "post.comment:1").await.unwrap(),
        Some(1)
    );
    let sent = harness.notifications.all().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::Comment);
    assert_eq!(sent[0].receiver_id, 9);
    assert_eq!(
        harness.kv.published().await,
        vec![("notify:unread:9".to_string(), r#"{"unread":1}"#.to_string())]
    );
}

#[tokio::test]
async fn denied_comment_is_rejected_and_not_counted() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    let mut bad = comment(21, 1, 4);
    bad.content = "forbidden words".into();
    harness.content.insert_comment(bad).await;
    harness
        .apply(
            CdcTable::PostComments,
            event(
                CdcTable::PostComments,
                Op::Insert,
                [
                    ("id", "21"),
                    ("post_id", "1"),
                    ("user_id", "4"),
                    ("content", "forbidden words"),
                ],
                1700,
            ),
        )
        .await
        .unwrap();

    let stored = harness.content.get_comment(21).await.unwrap().unwrap();
    assert_eq!(stored.status, ContentStatus::Rejected);
    assert_eq!(
        CounterStore::get(&harness.kv, "post.comment:1").await.unwrap(),
        None
    );
    assert!(harness.notifications.all().await.is_empty());
}

#[tokio::test]
async fn reply_to_a_missing_root_is_skipped() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    let outcome = harness
        .apply(
            CdcTable::PostComments,
            event(
                CdcTable::PostComments,
                Op::Insert,
                [("id", "30"), ("post_id", "1"), ("user_id", "4"), ("root_id", "77")],
                1,
            ),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(cornerstone_domain::error::DomainError::Validation(_))
    ));
    assert_eq!(harness.text.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn post_with_a_denied_image_is_rejected_without_indexing() {
    let config = ModerationConfig {
        image_batch_size: 1,
        ..ModerationConfig::default()
    };
    let harness = Harness::with_moderation(config, Duration::from_secs(30));
    harness.seed_post(1, 9).await;
    harness
        .content
        .set_media(
            1,
            vec![
                MediaItem {
                    mime_type: "image/jpeg".into(),
                    url: "https://cdn.example.com/deny-1.jpg".into(),
                    ..MediaItem::default()
                },
                MediaItem {
                    mime_type: "image/jpeg".into(),
                    url: "https://cdn.example.com/ok-2.jpg".into(),
                    ..MediaItem::default()
                },
            ],
        )
        .await;

    harness
        .apply(
            CdcTable::Posts,
            event(
                CdcTable::Posts,
                Op::Insert,
                [
                    ("id", "1"),
                    ("user_id", "9"),
                    ("title", "hello"),
                    ("content", "some text"),
                    ("status", "0"),
                    ("content_version", "1"),
                ],
                1700,
            ),
        )
        .await
        .unwrap();

    let post = harness.content.get_post(1).await.unwrap().unwrap();
    assert_eq!(post.status, ContentStatus::Rejected);
    assert!(harness.index.get_post(1).await.unwrap().is_none());
    assert_eq!(harness.vision.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn passing_post_is_tagged_published_and_indexed() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    harness
        .apply(
            CdcTable::Posts,
            event(
                CdcTable::Posts,
                Op::Insert,
                [
                    ("id", "1"),
                    ("user_id", "9"),
                    ("title", "hello"),
                    ("content", "learning #rust today"),
                    ("status", "0"),
                    ("content_version", "1"),
                ],
                1700,
            ),
        )
        .await
        .unwrap();

    let post = harness.content.get_post(1).await.unwrap().unwrap();
    assert_eq!(post.status, ContentStatus::Published);
    let tags = harness.content.post_tags(1).await.unwrap().unwrap();
    assert_eq!(tags.main_tag.as_deref(), Some("technology"));
    assert_eq!(tags.ai_tags, vec!["rust", "async"]);

    let document = harness.index.get_post(1).await.unwrap().unwrap();
    assert_eq!(document.author_nickname, "user9");
    assert_eq!(document.user_tags, vec!["rust"]);
    assert_eq!(document.ai_tags, vec!["rust", "async"]);
    assert!(document.content_vector.is_some());
    assert_eq!(harness.index.post_version(1).await, Some(1700));
}

#[tokio::test]
async fn out_of_order_updates_keep_the_newest_document() {
    let harness = Harness::new();
    let mut post = harness.seed_post(1, 9).await;
    post.status = ContentStatus::Published;
    harness.content.insert_post(post).await;

    for (ts, title) in [(1700, "newer"), (1600, "older")] {
        let update = event(
            CdcTable::Posts,
            Op::Update,
            [("id", "1"), ("user_id", "9"), ("title", title), ("status", "1")],
            ts,
        )
        .with_before(row([("title", "before")]));
        harness.apply(CdcTable::Posts, update).await.unwrap();
    }

    let document = harness.index.get_post(1).await.unwrap().unwrap();
    assert_eq!(document.title, "newer");
    assert_eq!(harness.index.post_version(1).await, Some(1700));
    assert_eq!(harness.text.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn index_converges_to_the_highest_version_in_any_order() {
    let harness = Harness::new();
    let mut post = harness.seed_post(1, 9).await;
    post.status = ContentStatus::Published;
    harness.content.insert_post(post).await;

    for ts in [3i64, 1, 5, 2, 4] {
        let title = format!("v{ts}");
        let update = event(
            CdcTable::Posts,
            Op::Update,
            [("id", "1"), ("user_id", "9"), ("title", title.as_str()), ("status", "1")],
            ts,
        )
        .with_before(row([("status", "0")]));
        harness.apply(CdcTable::Posts, update).await.unwrap();
    }
    assert_eq!(harness.index.get_post(1).await.unwrap().unwrap().title, "v5");
}

#[tokio::test]
async fn soft_deleted_post_leaves_the_index() {
    let harness = Harness::new();
    let mut post = harness.seed_post(1, 9).await;
    post.status = ContentStatus::Published;
    harness.content.insert_post(post).await;
    let publish = event(
        CdcTable::Posts,
        Op::Update,
        [("id", "1"), ("user_id", "9"), ("status", "1")],
        10,
    )
    .with_before(row([("status", "0")]));
    harness.apply(CdcTable::Posts, publish).await.unwrap();
    assert!(harness.index.get_post(1).await.unwrap().is_some());

    let delete = event(
        CdcTable::Posts,
        Op::Update,
        [("id", "1"), ("user_id", "9"), ("status", "1"), ("is_deleted", "1")],
        11,
    )
    .with_before(row([("is_deleted", "0")]));
    harness.apply(CdcTable::Posts, delete).await.unwrap();
    assert!(harness.index.get_post(1).await.unwrap().is_none());

    let hard_delete = event(CdcTable::Posts, Op::Delete, [("id", "1")], 12);
    harness.apply(CdcTable::Posts, hard_delete).await.unwrap();
}

#[tokio::test]
async fn profile_update_reaches_user_and_post_documents() {
    let harness = Harness::new();
    let mut post = harness.seed_post(1, 9).await;
    post.status = ContentStatus::Published;
    harness.content.insert_post(post).await;
    let publish = event(
        CdcTable::Posts,
        Op::Update,
        [("id", "1"), ("user_id", "9"), ("status", "1")],
        10,
    )
    .with_before(row([("status", "0")]));
    harness.apply(CdcTable::Posts, publish).await.unwrap();

    harness
        .content
        .insert_profile(UserProfile {
            user_id: 9,
            nickname: "renamed".into(),
            ..UserProfile::default()
        })
        .await;
    harness
        .apply(
            CdcTable::UserDetail,
            event(
                CdcTable::UserDetail,
                Op::Update,
                [("user_id", "9"), ("nickname", "renamed"), ("avatar_url", "a.png")],
                20,
            ),
        )
        .await
        .unwrap();

    assert_eq!(harness.index.user(9).await.unwrap().nickname, "renamed");
    let document = harness.index.get_post(1).await.unwrap().unwrap();
    assert_eq!(document.author_nickname, "renamed");
    assert_eq!(document.author_avatar, "a.png");
}

#[tokio::test]
async fn comment_likes_track_likers_and_notify_the_comment_author() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    harness.content.insert_comment(comment(10, 1, 4)).await;
    let pairs = [("user_id", "6"), ("comment_id", "10")];
    harness
        .apply(CdcTable::CommentLikes, event(CdcTable::CommentLikes, Op::Insert, pairs, 1))
        .await
        .unwrap();

    assert_eq!(
        harness.kv.set_members("comment.like.users:10").await,
        vec!["6"]
    );
    assert_eq!(harness.kv.set_members("dirty:comment_like").await, vec!["10"]);
    let sent = harness.notifications.all().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::CommentLike);
    assert_eq!(sent[0].receiver_id, 4);
    assert_eq!(sent[0].target_id, 1);

    harness
        .apply(CdcTable::CommentLikes, event(CdcTable::CommentLikes, Op::Delete, pairs, 2))
        .await
        .unwrap();
    assert!(harness.kv.set_members("comment.like.users:10").await.is_empty());
    assert_eq!(
        CounterStore::get(&harness.kv, "comment.like:10").await.unwrap(),
        Some(0)
    );
}

#[tokio::test]
async fn likes_and_views_feed_the_interest_set() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    harness
        .services
        .content
        .save_post_tags(&PostTags {
            post_id: 1,
            main_tag: Some("technology".into()),
            ai_tags: vec!["rust".into(), "async".into(), "tokio".into()],
        })
        .await
        .unwrap();

    harness
        .apply(
            CdcTable::PostViews,
            event(CdcTable::PostViews, Op::Insert, [("user_id", "7"), ("post_id", "1")], 1),
        )
        .await
        .unwrap();
    let mut tags: Vec<String> = harness
        .kv
        .sorted_members(&interest_key(7))
        .await
        .into_iter()
        .map(|(tag, _)| tag)
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["async", "rust"]);
    assert_eq!(harness.kv.set_members("dirty:interest").await, vec!["7"]);

    harness
        .services
        .interests
        .record(7, 1, InterestAction::Like, &harness.cancel)
        .await
        .unwrap();
    assert_eq!(harness.kv.sorted_members(&interest_key(7)).await.len(), 3);
}

#[tokio::test]
async fn expired_interest_set_is_restored_from_the_snapshot() {
    let harness = Harness::new();
    harness.seed_post(1, 9).await;
    harness
        .services
        .content
        .save_post_tags(&PostTags {
            post_id: 1,
            main_tag: None,
            ai_tags: vec!["rust".into()],
        })
        .await
        .unwrap();
    harness
        .interest_store
        .save(&InterestSnapshot {
            user_id: 7,
            interests: [("cooking".to_string(), 10)].into_iter().collect(),
            updated_at_ms: 0,
        })
        .await
        .unwrap();

    harness
        .services
        .interests
        .record(7, 1, InterestAction::Collect, &harness.cancel)
        .await
        .unwrap();
    let members = harness.kv.sorted_members(&interest_key(7)).await;
    assert_eq!(members.len(), 2);
    assert_eq!(members[1], ("cooking".to_string(), 10));
}
