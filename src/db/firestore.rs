// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profiles and the mirrored follow graph)
//! - Stories (drafts, published stories, feed queries)
//! - Story parts (chapters linked to a story)

use crate::db::collections;
use crate::error::AppError;
use crate::models::{Story, StoryPart, StoryStatus, User};
use crate::services::feed::{FeedCursor, FeedSource};
use crate::services::follow::{FollowAction, GraphStore};
use firestore::errors::FirestoreError;
use firestore::{FirestoreQueryCursor, FirestoreQueryDirection, FirestoreWritePrecondition};
use futures_util::{stream, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;
// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Attempts at deleting a story while new parts keep arriving.
const MAX_CASCADE_ROUNDS: usize = 5;

/// Upper bound for name-prefix search: the highest BMP private-use codepoint.
const PREFIX_SEARCH_SENTINEL: char = '\u{f8ff}';

/// Result of flipping a story to published.
#[derive(Debug)]
pub enum PublishOutcome {
    Published(Story),
    AlreadyPublished,
    Missing,
}

/// Map a write error, keeping precondition failures distinguishable.
fn write_error(e: FirestoreError, what: &str) -> AppError {
    match e {
        FirestoreError::DataNotFoundError(_) => AppError::NotFound(format!("{} not found", what)),
        FirestoreError::DataConflictError(_) => {
            AppError::Conflict(format!("{} already exists", what))
        }
        other => AppError::Database(other.to_string()),
    }
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get a user profile by ID.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a user profile. Fails with `Conflict` if one already exists.
    ///
    /// Later edits go through field-scoped updates so they never clobber the
    /// follow arrays.
    pub async fn create_user(&self, user: &User) -> Result<(), AppError> {
        let _: User = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| write_error(e, "Profile"))?;
        Ok(())
    }

    /// Write only the listed fields of an existing `user`.
    async fn update_user_fields(&self, user: &User, fields: &[&str]) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(fields.iter().copied())
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| write_error(e, "Profile"))?;
        Ok(())
    }

    /// Update a user's display name.
    pub async fn update_user_name(&self, user: &User) -> Result<(), AppError> {
        self.update_user_fields(user, &["name"]).await
    }

    /// Update a user's profile picture URL.
    pub async fn update_profile_picture(&self, user: &User) -> Result<(), AppError> {
        self.update_user_fields(user, &["profile_picture_url"]).await
    }

    /// Find users whose name starts with `prefix`.
    ///
    /// Emulated with a range query: `prefix <= name <= prefix + U+F8FF`.
    pub async fn search_users_by_name_prefix(
        &self,
        prefix: &str,
        limit: u32,
    ) -> Result<Vec<User>, AppError> {
        let upper = format!("{}{}", prefix, PREFIX_SEARCH_SENTINEL);

        self.get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(|q| {
                q.for_all([
                    q.field("name").greater_than_or_equal(prefix),
                    q.field("name").less_than_or_equal(upper.as_str()),
                ])
            })
            .order_by([("name", FirestoreQueryDirection::Ascending)])
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Fetch several profiles, preserving the order of `user_ids`.
    ///
    /// IDs that do not resolve to a document are skipped.
    pub async fn get_users(&self, user_ids: &[String]) -> Result<Vec<User>, AppError> {
        let results = stream::iter(user_ids.iter().cloned())
            .map(|id| async move { self.get_user(&id).await })
            .buffered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<Option<User>, AppError>>>()
            .await;

        let mut users = Vec::with_capacity(results.len());
        for result in results {
            if let Some(user) = result? {
                users.push(user);
            }
        }
        Ok(users)
    }

    // ─── Story Operations ────────────────────────────────────────

    /// Get a story by ID.
    pub async fn get_story(&self, story_id: &str) -> Result<Option<Story>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::STORIES)
            .obj()
            .one(story_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new story document.
    pub async fn create_story(&self, story: &Story) -> Result<(), AppError> {
        let _: Story = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::STORIES)
            .document_id(&story.id)
            .object(story)
            .execute()
            .await
            .map_err(|e| write_error(e, "Story"))?;
        Ok(())
    }

    /// Write only the listed fields of an existing story.
    ///
    /// Fails with `NotFound` if the story was deleted meanwhile.
    async fn update_story_fields(&self, story: &Story, fields: &[&str]) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(fields.iter().copied())
            .in_col(collections::STORIES)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(&story.id)
            .object(story)
            .execute()
            .await
            .map_err(|e| write_error(e, "Story"))?;
        Ok(())
    }

    /// Save edited story metadata. Status and publication time are untouched.
    pub async fn update_story_metadata(&self, story: &Story) -> Result<(), AppError> {
        self.update_story_fields(
            story,
            &["title", "description", "tags", "category", "modified_at"],
        )
        .await
    }

    /// Save a new cover image URL.
    pub async fn update_story_cover(&self, story: &Story) -> Result<(), AppError> {
        self.update_story_fields(story, &["cover_image_url", "modified_at"])
            .await
    }

    /// Publish a story if it is still a draft.
    ///
    /// The status is re-read inside the transaction, so two concurrent
    /// publishes resolve to one `Published` and one `AlreadyPublished`.
    pub async fn publish_story(
        &self,
        story_id: &str,
        published_at: &str,
    ) -> Result<PublishOutcome, AppError> {
        let story_id = story_id.to_string();
        let published_at = published_at.to_string();

        self.get_client()?
            .run_transaction(|db, transaction| {
                let story_id = story_id.clone();
                let published_at = published_at.clone();
                Box::pin(async move {
                    let story: Option<Story> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::STORIES)
                        .obj()
                        .one(&story_id)
                        .await?;

                    let Some(mut story) = story else {
                        return Ok(PublishOutcome::Missing);
                    };
                    if story.status == StoryStatus::Published {
                        return Ok(PublishOutcome::AlreadyPublished);
                    }

                    story.status = StoryStatus::Published;
                    story.published_at = Some(published_at.clone());
                    story.modified_at = published_at;

                    db.fluent()
                        .update()
                        .fields(["status", "published_at", "modified_at"])
                        .in_col(collections::STORIES)
                        .document_id(&story.id)
                        .object(&story)
                        .add_to_transaction(transaction)?;

                    Ok(PublishOutcome::Published(story))
                })
            })
            .await
            .map_err(|e| AppError::Database(format!("Publish transaction failed: {}", e)))
    }

    /// A user's drafts, oldest first.
    pub async fn list_drafts(&self, user_id: &str) -> Result<Vec<Story>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::STORIES)
            .filter(|q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("status").eq(StoryStatus::Draft.as_str()),
                ])
            })
            .order_by([("created_at", FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// A user's published stories, newest first.
    pub async fn list_published_by_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Story>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::STORIES)
            .filter(|q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("status").eq(StoryStatus::Published.as_str()),
                ])
            })
            .order_by([("published_at", FirestoreQueryDirection::Descending)])
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a story together with all of its parts.
    ///
    /// Surplus parts are removed in chunks first. The remaining parts are
    /// then re-read inside the transaction that deletes the story, so a part
    /// added concurrently is either deleted with it or rejected by `add_part`.
    ///
    /// Returns the number of parts deleted.
    pub async fn delete_story_cascade(&self, story_id: &str) -> Result<usize, AppError> {
        let client = self.get_client()?;
        let owned_id = story_id.to_string();
        let mut deleted = 0;

        for _ in 0..MAX_CASCADE_ROUNDS {
            let parts = self.list_parts(story_id).await?;

            // Leave room for the story document in the final transaction.
            let split = parts.len().saturating_sub(BATCH_SIZE - 1);
            if split > 0 {
                self.batch_delete(&parts[..split], collections::STORY_PARTS, |p: &StoryPart| {
                    p.id.clone()
                })
                .await?;
                deleted += split;
                tracing::debug!(story_id, count = split, "Deleted leading story parts");
            }

            let finished = client
                .run_transaction(|db, transaction| {
                    let story_id = owned_id.clone();
                    Box::pin(async move {
                        let parts: Vec<StoryPart> = db
                            .fluent()
                            .select()
                            .from(collections::STORY_PARTS)
                            .filter(|q| q.for_all([q.field("story_id").eq(story_id.as_str())]))
                            .limit(BATCH_SIZE as u32)
                            .obj()
                            .query()
                            .await?;

                        // More parts arrived than one transaction can hold.
                        if parts.len() >= BATCH_SIZE {
                            return Ok(None);
                        }

                        for part in &parts {
                            db.fluent()
                                .delete()
                                .from(collections::STORY_PARTS)
                                .document_id(&part.id)
                                .add_to_transaction(transaction)?;
                        }
                        db.fluent()
                            .delete()
                            .from(collections::STORIES)
                            .document_id(&story_id)
                            .add_to_transaction(transaction)?;

                        Ok(Some(parts.len()))
                    })
                })
                .await
                .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

            if let Some(count) = finished {
                deleted += count;
                tracing::info!(story_id, parts = deleted, "Story deleted with parts");
                return Ok(deleted);
            }
        }

        Err(AppError::Conflict(
            "Story is still receiving new parts; retry the deletion".to_string(),
        ))
    }

    // ─── Story Part Operations ───────────────────────────────────

    /// Get a story part by ID.
    pub async fn get_part(&self, part_id: &str) -> Result<Option<StoryPart>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::STORY_PARTS)
            .obj()
            .one(part_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store a new part, provided its story still exists.
    ///
    /// The parent is read in the same transaction as the write, which keeps
    /// a concurrent `delete_story_cascade` from leaving the part orphaned.
    /// Returns `false` if the story is gone.
    pub async fn add_part(&self, part: &StoryPart) -> Result<bool, AppError> {
        let part = part.clone();

        self.get_client()?
            .run_transaction(|db, transaction| {
                let part = part.clone();
                Box::pin(async move {
                    let parent: Option<Story> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::STORIES)
                        .obj()
                        .one(&part.story_id)
                        .await?;
                    if parent.is_none() {
                        return Ok(false);
                    }

                    db.fluent()
                        .update()
                        .in_col(collections::STORY_PARTS)
                        .document_id(&part.id)
                        .object(&part)
                        .add_to_transaction(transaction)?;

                    Ok(true)
                })
            })
            .await
            .map_err(|e| AppError::Database(format!("Part transaction failed: {}", e)))
    }

    /// Save an edited part's title and content.
    pub async fn update_part_content(&self, part: &StoryPart) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(["title", "content", "modified_at"])
            .in_col(collections::STORY_PARTS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(&part.id)
            .object(part)
            .execute()
            .await
            .map_err(|e| write_error(e, "Part"))?;
        Ok(())
    }

    /// All parts of a story in writing order.
    pub async fn list_parts(&self, story_id: &str) -> Result<Vec<StoryPart>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::STORY_PARTS)
            .filter(|q| q.for_all([q.field("story_id").eq(story_id)]))
            .order_by([("written_at", FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Helper Methods ────────────────────────────────────────────

    /// Helper to batch delete documents using transactions.
    async fn batch_delete<T, F>(
        &self,
        items: &[T],
        collection: &str,
        id_extractor: F,
    ) -> Result<(), AppError>
    where
        F: Fn(&T) -> String,
    {
        let client = self.get_client()?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(&doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }

    /// Queue a set-union or set-remove of `value` on an array field.
    fn add_array_transform(
        client: &firestore::FirestoreDb,
        transaction: &mut firestore::FirestoreTransaction<'_>,
        user_id: &str,
        field: &str,
        value: &str,
        action: FollowAction,
    ) -> Result<(), AppError> {
        client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(user_id)
            .transforms(|t| match action {
                FollowAction::Follow => t.fields([t.field(field).append_missing_elements([value])]),
                FollowAction::Unfollow => t.fields([t.field(field).remove_all_from_array([value])]),
            })
            .only_transform()
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add {} update to transaction: {}", field, e))
            })?;
        Ok(())
    }
}

impl GraphStore for FirestoreDb {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        FirestoreDb::get_user(self, user_id).await
    }

    /// Both array updates commit in one transaction. Array union/remove give
    /// set semantics, so repeating an action is a no-op.
    async fn apply_follow_edge(
        &self,
        actor_id: &str,
        target_id: &str,
        action: FollowAction,
    ) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        Self::add_array_transform(
            client,
            &mut transaction,
            actor_id,
            "following",
            target_id,
            action,
        )?;
        Self::add_array_transform(
            client,
            &mut transaction,
            target_id,
            "followers",
            actor_id,
            action,
        )?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        tracing::info!(actor_id, target_id, ?action, "Follow edge updated");

        Ok(())
    }
}

impl FeedSource for FirestoreDb {
    async fn published_by_authors(
        &self,
        authors: &[String],
        after: Option<&FeedCursor>,
        limit: u32,
    ) -> Result<Vec<Story>, AppError> {
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::STORIES)
            .filter(|q| {
                q.for_all([
                    q.field("status").eq(StoryStatus::Published.as_str()),
                    q.field("user_id").is_in(authors.to_vec()),
                ])
            })
            .order_by([
                ("published_at", FirestoreQueryDirection::Descending),
                ("id", FirestoreQueryDirection::Descending),
            ]);

        let query = match after {
            Some(cursor) => query.start_at(FirestoreQueryCursor::AfterValue(vec![
                cursor.published_at.clone().into(),
                cursor.story_id.clone().into(),
            ])),
            None => query,
        };

        query
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
