// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Story and story-part routes.
//!
//! Drafts are visible only to their owner. Only the owner may edit, publish,
//! delete or add parts. Publishing is one-way.

use crate::db::PublishOutcome;
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::story::validate_part_words;
use crate::models::{Story, StoryPart, StoryStatus};
use crate::services::storage::{check_image, story_cover_object};
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::{Validate, ValidationError};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const MAX_TAGS: usize = 20;
const MAX_TAG_CHARS: usize = 50;
const USER_STORIES_LIMIT: u32 = 50;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stories", post(create_story))
        .route("/api/stories/drafts", get(list_drafts))
        .route(
            "/api/stories/{id}",
            get(get_story).patch(update_story).delete(delete_story),
        )
        .route("/api/stories/{id}/publish", post(publish_story))
        .route("/api/stories/{id}/cover", put(upload_cover))
        .route("/api/stories/{id}/parts", get(list_parts).post(add_part))
        .route("/api/parts/{id}", get(get_part).patch(update_part))
        .route("/api/users/{id}/stories", get(list_user_stories))
}

// ─── Responses ───────────────────────────────────────────────

/// Full story metadata.
#[derive(Serialize, Clone, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StoryResponse {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
    pub cover_image_url: Option<String>,
    pub status: StoryStatus,
    pub created_at: String,
    pub modified_at: String,
    pub published_at: Option<String>,
}

impl From<Story> for StoryResponse {
    fn from(story: Story) -> Self {
        Self {
            id: story.id,
            author_id: story.user_id,
            title: story.title,
            description: story.description,
            tags: story.tags,
            category: story.category,
            cover_image_url: story.cover_image_url,
            status: story.status,
            created_at: story.created_at,
            modified_at: story.modified_at,
            published_at: story.published_at,
        }
    }
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StoryListResponse {
    pub stories: Vec<StoryResponse>,
}

#[derive(Serialize, Clone, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PartResponse {
    pub id: String,
    pub story_id: String,
    pub title: String,
    pub content: String,
    pub word_count: u32,
    pub written_at: String,
    pub modified_at: String,
}

impl From<StoryPart> for PartResponse {
    fn from(part: StoryPart) -> Self {
        Self {
            word_count: crate::models::story::word_count(&part.content) as u32,
            id: part.id,
            story_id: part.story_id,
            title: part.title,
            content: part.content,
            written_at: part.written_at,
            modified_at: part.modified_at,
        }
    }
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PartListResponse {
    pub parts: Vec<PartResponse>,
}

// ─── Requests ────────────────────────────────────────────────

fn validate_tags(tags: &[String]) -> std::result::Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::new("too_many_tags"));
    }
    if tags
        .iter()
        .any(|t| t.trim().is_empty() || t.chars().count() > MAX_TAG_CHARS)
    {
        return Err(ValidationError::new("invalid_tag"));
    }
    Ok(())
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[derive(Deserialize, Validate)]
struct CreateStoryRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    description: String,
    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    tags: Vec<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    category: String,
    #[serde(default)]
    #[validate(url)]
    cover_image_url: Option<String>,
}

#[derive(Deserialize, Validate)]
struct UpdateStoryRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    #[validate(length(max = 2000))]
    description: Option<String>,
    #[validate(custom(function = "validate_tags"))]
    tags: Option<Vec<String>>,
    #[validate(length(max = 100))]
    category: Option<String>,
}

#[derive(Deserialize, Validate)]
struct PartRequest {
    #[serde(default)]
    #[validate(length(max = 200))]
    title: String,
    #[serde(default)]
    #[validate(custom(function = "validate_part_words"))]
    content: String,
}

// ─── Helpers ─────────────────────────────────────────────────

/// Load a story the caller may read. Other users' drafts look missing.
async fn load_visible_story(state: &AppState, user: &AuthUser, story_id: &str) -> Result<Story> {
    state
        .db
        .get_story(story_id)
        .await?
        .filter(|story| story.is_visible_to(&user.user_id))
        .ok_or_else(|| AppError::NotFound(format!("Story {} not found", story_id)))
}

/// Load a story the caller owns.
async fn load_owned_story(state: &AppState, user: &AuthUser, story_id: &str) -> Result<Story> {
    let story = load_visible_story(state, user, story_id).await?;
    if !story.is_owned_by(&user.user_id) {
        return Err(AppError::Forbidden(format!(
            "Story {} belongs to another user",
            story_id
        )));
    }
    Ok(story)
}

// ─── Stories ─────────────────────────────────────────────────

/// Start a new draft.
async fn create_story(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateStoryRequest>,
) -> Result<Json<StoryResponse>> {
    body.validate()?;

    let now = now_rfc3339();
    let story = Story {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.user_id.clone(),
        title: body.title.trim().to_string(),
        description: body.description,
        tags: normalize_tags(body.tags),
        category: body.category.trim().to_string(),
        cover_image_url: body.cover_image_url,
        status: StoryStatus::Draft,
        created_at: now.clone(),
        modified_at: now,
        published_at: None,
    };
    state.db.create_story(&story).await?;

    tracing::info!(user_id = %user.user_id, story_id = %story.id, "Draft created");

    Ok(Json(story.into()))
}

/// The caller's drafts, oldest first.
async fn list_drafts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<StoryListResponse>> {
    let drafts = state.db.list_drafts(&user.user_id).await?;
    Ok(Json(StoryListResponse {
        stories: drafts.into_iter().map(StoryResponse::from).collect(),
    }))
}

/// A user's published stories, newest first.
async fn list_user_stories(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StoryListResponse>> {
    let stories = state
        .db
        .list_published_by_user(&id, USER_STORIES_LIMIT)
        .await?;
    Ok(Json(StoryListResponse {
        stories: stories.into_iter().map(StoryResponse::from).collect(),
    }))
}

async fn get_story(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<StoryResponse>> {
    Ok(Json(load_visible_story(&state, &user, &id).await?.into()))
}

/// Edit story metadata.
async fn update_story(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStoryRequest>,
) -> Result<Json<StoryResponse>> {
    body.validate()?;

    let mut story = load_owned_story(&state, &user, &id).await?;
    if let Some(title) = body.title {
        story.title = title.trim().to_string();
    }
    if let Some(description) = body.description {
        story.description = description;
    }
    if let Some(tags) = body.tags {
        story.tags = normalize_tags(tags);
    }
    if let Some(category) = body.category {
        story.category = category.trim().to_string();
    }
    story.modified_at = now_rfc3339();
    state.db.update_story_metadata(&story).await?;

    Ok(Json(load_visible_story(&state, &user, &id).await?.into()))
}

/// Flip a draft to published.
async fn publish_story(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<StoryResponse>> {
    load_owned_story(&state, &user, &id).await?;

    match state.db.publish_story(&id, &now_rfc3339()).await? {
        PublishOutcome::Published(story) => {
            tracing::info!(user_id = %user.user_id, story_id = %id, "Story published");
            Ok(Json(story.into()))
        }
        PublishOutcome::AlreadyPublished => Err(AppError::Conflict(format!(
            "Story {} is already published",
            id
        ))),
        PublishOutcome::Missing => Err(AppError::NotFound(format!("Story {} not found", id))),
    }
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DeleteStoryResponse {
    pub success: bool,
    pub parts_deleted: u32,
}

/// Delete a story and all of its parts.
async fn delete_story(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<DeleteStoryResponse>> {
    load_owned_story(&state, &user, &id).await?;

    let parts_deleted = state.db.delete_story_cascade(&id).await?;

    Ok(Json(DeleteStoryResponse {
        success: true,
        parts_deleted: parts_deleted as u32,
    }))
}

/// Upload a cover image (raw image body).
async fn upload_cover(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<StoryResponse>> {
    let kind = check_image(&body, state.config.max_upload_bytes)?;
    let mut story = load_owned_story(&state, &user, &id).await?;

    let object = story_cover_object(&user.user_id, chrono::Utc::now(), kind);
    let url = state.storage.put_object(&object, kind, body.to_vec()).await?;

    story.cover_image_url = Some(url);
    story.modified_at = now_rfc3339();
    state.db.update_story_cover(&story).await?;

    tracing::info!(story_id = %id, object = %object, "Cover image updated");

    Ok(Json(load_visible_story(&state, &user, &id).await?.into()))
}

// ─── Parts ───────────────────────────────────────────────────

async fn list_parts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<PartListResponse>> {
    load_visible_story(&state, &user, &id).await?;

    let parts = state.db.list_parts(&id).await?;
    Ok(Json(PartListResponse {
        parts: parts.into_iter().map(PartResponse::from).collect(),
    }))
}

/// Append a part to a story.
async fn add_part(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<PartRequest>,
) -> Result<Json<PartResponse>> {
    // Word limit is checked before anything is read or written.
    body.validate()?;

    let story = load_owned_story(&state, &user, &id).await?;

    let now = now_rfc3339();
    let part = StoryPart {
        id: uuid::Uuid::new_v4().to_string(),
        story_id: story.id,
        title: body.title.trim().to_string(),
        content: body.content,
        written_at: now.clone(),
        modified_at: now,
    };
    if !state.db.add_part(&part).await? {
        return Err(AppError::NotFound(format!("Story {} not found", id)));
    }

    tracing::info!(story_id = %id, part_id = %part.id, "Story part added");

    Ok(Json(part.into()))
}

async fn load_part(state: &AppState, part_id: &str) -> Result<StoryPart> {
    state
        .db
        .get_part(part_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Story part {} not found", part_id)))
}

async fn get_part(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<PartResponse>> {
    let part = load_part(&state, &id).await?;
    load_visible_story(&state, &user, &part.story_id).await?;
    Ok(Json(part.into()))
}

/// Rewrite a part's title and body.
async fn update_part(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<PartRequest>,
) -> Result<Json<PartResponse>> {
    body.validate()?;

    let mut part = load_part(&state, &id).await?;
    load_owned_story(&state, &user, &part.story_id).await?;

    part.title = body.title.trim().to_string();
    part.content = body.content;
    part.modified_at = now_rfc3339();
    state.db.update_part_content(&part).await?;

    Ok(Json(part.into()))
}
