// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile, search and follow routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::User;
use crate::services::follow::{self, FollowAction, FollowStatus};
use crate::services::storage::{check_image, profile_picture_object};
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const SEARCH_LIMIT: u32 = 20;
const MAX_SEARCH_QUERY_CHARS: usize = 100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users", post(create_profile))
        .route("/api/me", get(get_me).patch(update_me))
        .route("/api/me/picture", put(upload_profile_picture))
        .route("/api/users/search", get(search_users))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/followers", get(get_followers))
        .route("/api/users/{id}/following", get(get_following))
        .route("/api/users/{id}/follow", put(follow).delete(unfollow))
}

// ─── Profiles ────────────────────────────────────────────────

/// Full profile of the signed-in user.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub profile_picture_url: Option<String>,
    pub followers_count: u32,
    pub following_count: u32,
}

impl From<User> for MeResponse {
    fn from(user: User) -> Self {
        Self {
            followers_count: user.followers.len() as u32,
            following_count: user.following.len() as u32,
            id: user.id,
            name: user.name,
            email: user.email,
            profile_picture_url: user.profile_picture_url,
        }
    }
}

/// Another user's public profile.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileResponse {
    pub id: String,
    pub name: String,
    pub profile_picture_url: Option<String>,
    pub followers_count: u32,
    pub following_count: u32,
    /// Whether the caller follows this user
    pub is_followed: bool,
}

/// Compact entry for lists and search results.
#[derive(Serialize, Clone, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub profile_picture_url: Option<String>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            profile_picture_url: user.profile_picture_url,
        }
    }
}

#[derive(Deserialize, Validate)]
struct CreateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(email)]
    email: String,
}

/// Create the caller's profile right after signup.
async fn create_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateProfileRequest>,
) -> Result<Json<MeResponse>> {
    body.validate()?;

    let profile = User {
        id: user.user_id.clone(),
        name: body.name.trim().to_string(),
        email: body.email.trim().to_string(),
        profile_picture_url: None,
        followers: vec![],
        following: vec![],
        created_at: now_rfc3339(),
    };
    // Create-only write: a second signup fails with 409 instead of
    // overwriting the follow arrays.
    state.db.create_user(&profile).await?;

    tracing::info!(user_id = %user.user_id, "Profile created");

    Ok(Json(profile.into()))
}

async fn load_me(state: &AppState, user: &AuthUser) -> Result<User> {
    state
        .db
        .get_user(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.user_id)))
}

/// Get current user profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MeResponse>> {
    Ok(Json(load_me(&state, &user).await?.into()))
}

#[derive(Deserialize, Validate)]
struct UpdateMeRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
}

/// Change the caller's display name.
async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdateMeRequest>,
) -> Result<Json<MeResponse>> {
    body.validate()?;

    let mut profile = load_me(&state, &user).await?;
    profile.name = body.name.trim().to_string();
    state.db.update_user_name(&profile).await?;

    Ok(Json(load_me(&state, &user).await?.into()))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ImageUploadResponse {
    pub url: String,
}

/// Upload a new profile picture (raw image body).
async fn upload_profile_picture(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<ImageUploadResponse>> {
    let kind = check_image(&body, state.config.max_upload_bytes)?;
    let mut profile = load_me(&state, &user).await?;

    let object = profile_picture_object(&user.user_id, kind);
    let url = state.storage.put_object(&object, kind, body.to_vec()).await?;

    profile.profile_picture_url = Some(url.clone());
    state.db.update_profile_picture(&profile).await?;

    tracing::info!(user_id = %user.user_id, object = %object, "Profile picture updated");

    Ok(Json(ImageUploadResponse { url }))
}

/// Get another user's public profile.
async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>> {
    let profile = state
        .db
        .get_user(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

    Ok(Json(ProfileResponse {
        is_followed: profile.followers.iter().any(|f| *f == user.user_id),
        followers_count: profile.followers.len() as u32,
        following_count: profile.following.len() as u32,
        id: profile.id,
        name: profile.name,
        profile_picture_url: profile.profile_picture_url,
    }))
}

// ─── Search ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserListResponse {
    pub users: Vec<UserSummary>,
}

/// Search users by display-name prefix.
async fn search_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<UserListResponse>> {
    let prefix = params.q.trim();
    if prefix.is_empty() {
        return Ok(Json(UserListResponse { users: vec![] }));
    }
    if prefix.chars().count() > MAX_SEARCH_QUERY_CHARS {
        return Err(AppError::BadRequest("Search query too long".to_string()));
    }

    let users = state
        .db
        .search_users_by_name_prefix(prefix, SEARCH_LIMIT)
        .await?;

    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserSummary::from).collect(),
    }))
}

// ─── Follow Graph ────────────────────────────────────────────

/// List the users following `id`.
async fn get_followers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserListResponse>> {
    let profile = state
        .db
        .get_user(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

    let users = state.db.get_users(&profile.followers).await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserSummary::from).collect(),
    }))
}

/// List the users `id` follows.
async fn get_following(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserListResponse>> {
    let profile = state
        .db
        .get_user(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

    let users = state.db.get_users(&profile.following).await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserSummary::from).collect(),
    }))
}

async fn follow(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<FollowStatus>> {
    let status = follow::set_follow(&state.db, &user.user_id, &id, FollowAction::Follow).await?;
    Ok(Json(status))
}

async fn unfollow(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<FollowStatus>> {
    let status =
        follow::set_follow(&state.db, &user.user_id, &id, FollowAction::Unfollow).await?;
    Ok(Json(status))
}
