// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running and
//! FIRESTORE_EMULATOR_HOST to point at it. Every test works on freshly
//! generated IDs, so runs never interfere with each other.

use std::time::Duration;
use storyline_api::db::{FirestoreDb, PublishOutcome};
use storyline_api::error::AppError;
use storyline_api::models::{Story, StoryPart, StoryStatus, User};
use storyline_api::services::follow::{set_follow, FollowAction};
use storyline_api::services::{FeedAssembler, FeedSessionKey};
use storyline_api::time_utils::format_utc_rfc3339;

mod common;
use common::{test_db, unique_id};

fn test_user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", id),
        profile_picture_url: None,
        followers: vec![],
        following: vec![],
        created_at: "2026-01-15T10:00:00.000000Z".to_string(),
    }
}

/// Timestamp `minutes` after a fixed base, in the stored format.
fn at(minutes: i64) -> String {
    let base = chrono::DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    format_utc_rfc3339(base + chrono::Duration::minutes(minutes))
}

fn test_story(id: &str, user_id: &str, published_minute: Option<i64>) -> Story {
    Story {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("Story {}", id),
        description: String::new(),
        tags: vec![],
        category: "fiction".to_string(),
        cover_image_url: None,
        status: if published_minute.is_some() {
            StoryStatus::Published
        } else {
            StoryStatus::Draft
        },
        created_at: at(0),
        modified_at: at(0),
        published_at: published_minute.map(at),
    }
}

fn test_part(story_id: &str, minute: i64) -> StoryPart {
    StoryPart {
        id: unique_id("part"),
        story_id: story_id.to_string(),
        title: format!("Part {}", minute),
        content: "Once upon a time".to_string(),
        written_at: at(minute),
        modified_at: at(minute),
    }
}

async fn create_users(db: &FirestoreDb, ids: &[&str]) {
    for id in ids {
        db.create_user(&test_user(id, "Test User")).await.unwrap();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// USER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_user_create_and_update() {
    require_emulator!();

    let db = test_db().await;
    let id = unique_id("user");

    assert!(db.get_user(&id).await.unwrap().is_none());

    db.create_user(&test_user(&id, "Ada")).await.unwrap();
    let mut user = db.get_user(&id).await.unwrap().expect("user should exist");
    assert_eq!(user.name, "Ada");
    assert!(user.followers.is_empty());

    user.name = "Ada Lovelace".to_string();
    db.update_user_name(&user).await.unwrap();

    let stored = db.get_user(&id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Ada Lovelace");
    assert_eq!(stored.email, format!("{}@example.com", id));
}

#[tokio::test]
async fn test_create_user_rejects_existing_profile() {
    require_emulator!();

    let db = test_db().await;
    let alice = unique_id("alice");
    let bob = unique_id("bob");
    create_users(&db, &[&alice, &bob]).await;
    set_follow(&db, &alice, &bob, FollowAction::Follow)
        .await
        .unwrap();

    let err = db.create_user(&test_user(&bob, "Impostor")).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let stored = db.get_user(&bob).await.unwrap().unwrap();
    assert_eq!(stored.name, "Test User");
    assert_eq!(stored.followers, vec![alice]);
}

#[tokio::test]
async fn test_name_update_keeps_follow_arrays() {
    require_emulator!();

    let db = test_db().await;
    let alice = unique_id("alice");
    let bob = unique_id("bob");
    create_users(&db, &[&alice, &bob]).await;

    // Snapshot taken before the follow lands
    let mut stale = db.get_user(&bob).await.unwrap().unwrap();
    set_follow(&db, &alice, &bob, FollowAction::Follow)
        .await
        .unwrap();

    stale.name = "Robert".to_string();
    db.update_user_name(&stale).await.unwrap();

    let stored = db.get_user(&bob).await.unwrap().unwrap();
    assert_eq!(stored.name, "Robert");
    assert_eq!(stored.followers, vec![alice]);
}

#[tokio::test]
async fn test_search_by_name_prefix() {
    require_emulator!();

    let db = test_db().await;
    // Unique prefix so other tests' users never match
    let prefix = unique_id("Zed");
    let first = unique_id("user");
    let second = unique_id("user");
    let other = unique_id("user");

    db.create_user(&test_user(&first, &format!("{} Alpha", prefix)))
        .await
        .unwrap();
    db.create_user(&test_user(&second, &format!("{} Beta", prefix)))
        .await
        .unwrap();
    db.create_user(&test_user(&other, "Someone Else"))
        .await
        .unwrap();

    let found = db.search_users_by_name_prefix(&prefix, 20).await.unwrap();
    let ids: Vec<&str> = found.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));

    let limited = db.search_users_by_name_prefix(&prefix, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_get_users_skips_missing() {
    require_emulator!();

    let db = test_db().await;
    let a = unique_id("user");
    let b = unique_id("user");
    create_users(&db, &[&a, &b]).await;

    let ids = vec![b.clone(), unique_id("missing"), a.clone()];
    let users = db.get_users(&ids).await.unwrap();

    let got: Vec<String> = users.into_iter().map(|u| u.id).collect();
    assert_eq!(got, vec![b, a]);
}

// ═══════════════════════════════════════════════════════════════════════════
// FOLLOW GRAPH TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_follow_updates_both_users() {
    require_emulator!();

    let db = test_db().await;
    let alice = unique_id("alice");
    let bob = unique_id("bob");
    create_users(&db, &[&alice, &bob]).await;

    let status = set_follow(&db, &alice, &bob, FollowAction::Follow)
        .await
        .unwrap();
    assert!(status.following);
    assert_eq!(status.target_followers_count, 1);
    assert_eq!(status.actor_following_count, 1);

    let a = db.get_user(&alice).await.unwrap().unwrap();
    let b = db.get_user(&bob).await.unwrap().unwrap();
    assert_eq!(a.following, vec![bob.clone()]);
    assert_eq!(b.followers, vec![alice.clone()]);
}

#[tokio::test]
async fn test_follow_is_idempotent() {
    require_emulator!();

    let db = test_db().await;
    let alice = unique_id("alice");
    let bob = unique_id("bob");
    create_users(&db, &[&alice, &bob]).await;

    set_follow(&db, &alice, &bob, FollowAction::Follow)
        .await
        .unwrap();
    let status = set_follow(&db, &alice, &bob, FollowAction::Follow)
        .await
        .unwrap();

    assert_eq!(status.target_followers_count, 1);
    assert_eq!(status.actor_following_count, 1);
}

#[tokio::test]
async fn test_unfollow_restores_prior_state() {
    require_emulator!();

    let db = test_db().await;
    let alice = unique_id("alice");
    let bob = unique_id("bob");
    let carol = unique_id("carol");
    create_users(&db, &[&alice, &bob, &carol]).await;

    set_follow(&db, &carol, &bob, FollowAction::Follow)
        .await
        .unwrap();
    set_follow(&db, &alice, &bob, FollowAction::Follow)
        .await
        .unwrap();
    let status = set_follow(&db, &alice, &bob, FollowAction::Unfollow)
        .await
        .unwrap();

    assert!(!status.following);
    let b = db.get_user(&bob).await.unwrap().unwrap();
    assert_eq!(b.followers, vec![carol]);
    let a = db.get_user(&alice).await.unwrap().unwrap();
    assert!(a.following.is_empty());
}

#[tokio::test]
async fn test_concurrent_follows_all_land() {
    require_emulator!();

    let db = test_db().await;
    let target = unique_id("author");
    let fans: Vec<String> = (0..5).map(|_| unique_id("fan")).collect();
    create_users(&db, &[&target]).await;
    for fan in &fans {
        create_users(&db, &[fan]).await;
    }

    let follows = fans
        .iter()
        .map(|fan| set_follow(&db, fan, &target, FollowAction::Follow));
    futures_util::future::join_all(follows).await;

    let stored = db.get_user(&target).await.unwrap().unwrap();
    assert_eq!(stored.followers.len(), fans.len());
}

// ═══════════════════════════════════════════════════════════════════════════
// STORY AND PART TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_drafts_and_published_listing() {
    require_emulator!();

    let db = test_db().await;
    let author = unique_id("author");

    db.create_story(&test_story(&unique_id("draft"), &author, None))
        .await
        .unwrap();
    db.create_story(&test_story(&unique_id("old"), &author, Some(5)))
        .await
        .unwrap();
    db.create_story(&test_story(&unique_id("new"), &author, Some(10)))
        .await
        .unwrap();

    let drafts = db.list_drafts(&author).await.unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].status, StoryStatus::Draft);

    let published = db.list_published_by_user(&author, 20).await.unwrap();
    assert_eq!(published.len(), 2);
    assert!(published[0].published_at > published[1].published_at);
}

#[tokio::test]
async fn test_parts_listed_in_writing_order() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), None);
    db.create_story(&story).await.unwrap();
    let story_id = story.id;

    let later = test_part(&story_id, 20);
    let earlier = test_part(&story_id, 10);
    assert!(db.add_part(&later).await.unwrap());
    assert!(db.add_part(&earlier).await.unwrap());

    let parts = db.list_parts(&story_id).await.unwrap();
    let ids: Vec<&str> = parts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec![earlier.id.as_str(), later.id.as_str()]);
}

#[tokio::test]
async fn test_delete_story_removes_parts() {
    require_emulator!();

    let db = test_db().await;
    let author = unique_id("author");
    let story = test_story(&unique_id("story"), &author, None);
    db.create_story(&story).await.unwrap();

    let parts: Vec<StoryPart> = (0..3).map(|m| test_part(&story.id, m)).collect();
    for part in &parts {
        assert!(db.add_part(part).await.unwrap());
    }

    let deleted = db.delete_story_cascade(&story.id).await.unwrap();
    assert_eq!(deleted, 3);

    assert!(db.get_story(&story.id).await.unwrap().is_none());
    assert!(db.list_parts(&story.id).await.unwrap().is_empty());
    for part in &parts {
        assert!(db.get_part(&part.id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_stale_cover_update_keeps_publication() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), None);
    db.create_story(&story).await.unwrap();

    // Copy loaded before the publish commits
    let mut stale = db.get_story(&story.id).await.unwrap().unwrap();

    let published = match db.publish_story(&story.id, &at(30)).await.unwrap() {
        PublishOutcome::Published(s) => s,
        other => panic!("expected publish, got {:?}", other),
    };
    assert_eq!(published.published_at.as_deref(), Some(at(30).as_str()));

    stale.cover_image_url = Some("https://example.com/cover.png".to_string());
    stale.modified_at = at(31);
    db.update_story_cover(&stale).await.unwrap();

    stale.title = "Renamed".to_string();
    db.update_story_metadata(&stale).await.unwrap();

    let stored = db.get_story(&story.id).await.unwrap().unwrap();
    assert_eq!(stored.status, StoryStatus::Published);
    assert_eq!(stored.published_at, Some(at(30)));
    assert_eq!(stored.title, "Renamed");
    assert_eq!(
        stored.cover_image_url.as_deref(),
        Some("https://example.com/cover.png")
    );
}

#[tokio::test]
async fn test_publish_is_one_way() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), None);
    db.create_story(&story).await.unwrap();

    assert!(matches!(
        db.publish_story(&story.id, &at(5)).await.unwrap(),
        PublishOutcome::Published(_)
    ));
    assert!(matches!(
        db.publish_story(&story.id, &at(6)).await.unwrap(),
        PublishOutcome::AlreadyPublished
    ));
    assert!(matches!(
        db.publish_story(&unique_id("missing"), &at(6)).await.unwrap(),
        PublishOutcome::Missing
    ));

    let stored = db.get_story(&story.id).await.unwrap().unwrap();
    assert_eq!(stored.published_at, Some(at(5)));
}

#[tokio::test]
async fn test_update_of_deleted_story_is_not_found() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), None);
    db.create_story(&story).await.unwrap();
    let stale = db.get_story(&story.id).await.unwrap().unwrap();

    db.delete_story_cascade(&story.id).await.unwrap();

    let err = db.update_story_metadata(&stale).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(db.get_story(&story.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_part_rejected_after_story_deleted() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), None);
    db.create_story(&story).await.unwrap();

    // Ownership check passes, then the story is deleted before the write
    assert!(db.get_story(&story.id).await.unwrap().is_some());
    db.delete_story_cascade(&story.id).await.unwrap();

    let part = test_part(&story.id, 1);
    assert!(!db.add_part(&part).await.unwrap());
    assert!(db.list_parts(&story.id).await.unwrap().is_empty());
    assert!(db.get_part(&part.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_story_with_more_parts_than_one_batch() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), None);
    db.create_story(&story).await.unwrap();

    for minute in 0..450 {
        assert!(db.add_part(&test_part(&story.id, minute)).await.unwrap());
    }

    let deleted = db.delete_story_cascade(&story.id).await.unwrap();
    assert_eq!(deleted, 450);

    assert!(db.get_story(&story.id).await.unwrap().is_none());
    assert!(db.list_parts(&story.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_story_without_parts() {
    require_emulator!();

    let db = test_db().await;
    let story = test_story(&unique_id("story"), &unique_id("author"), Some(1));
    db.create_story(&story).await.unwrap();

    assert_eq!(db.delete_story_cascade(&story.id).await.unwrap(), 0);
    assert!(db.get_story(&story.id).await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// FEED TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_feed_pages_through_followed_authors() {
    require_emulator!();

    let db = test_db().await;
    let reader = unique_id("reader");
    let followed = unique_id("author");
    let stranger = unique_id("author");

    // 12 published stories by the followed author, plus noise
    for minute in 0..12 {
        let story = test_story(&format!("{}-{:02}", followed, minute), &followed, Some(minute));
        db.create_story(&story).await.unwrap();
    }
    db.create_story(&test_story(&unique_id("draft"), &followed, None))
        .await
        .unwrap();
    db.create_story(&test_story(&unique_id("other"), &stranger, Some(30)))
        .await
        .unwrap();

    let feed = FeedAssembler::new(Duration::from_secs(60));
    let session = FeedSessionKey {
        user_id: reader,
        issued_at: 1,
    };
    let following = vec![followed.clone()];

    let first = feed.next_page(&db, &session, &following, None).await;
    assert_eq!(first.stories.len(), 10);
    assert!(first.stories.iter().all(|s| s.user_id == followed));
    assert_eq!(first.stories[0].published_at, Some(at(11)));
    let cursor = first.next_cursor.clone().expect("more stories remain");

    let second = feed.next_page(&db, &session, &following, Some(&cursor)).await;
    assert_eq!(second.stories.len(), 2);
    assert_eq!(second.stories[1].published_at, Some(at(0)));
    assert!(second.end_of_feed());
}

#[tokio::test]
async fn test_feed_empty_follow_set() {
    require_emulator!();

    let db = test_db().await;
    let feed = FeedAssembler::new(Duration::from_secs(60));
    let session = FeedSessionKey {
        user_id: unique_id("reader"),
        issued_at: 1,
    };

    let page = feed.next_page(&db, &session, &[], None).await;
    assert!(page.stories.is_empty());
    assert!(page.end_of_feed());
}
