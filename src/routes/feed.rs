// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Home feed route.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Story;
use crate::services::{FeedCursor, FeedPage};
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/feed", get(get_feed))
}

#[derive(Deserialize)]
struct FeedQuery {
    /// Cursor from the previous page (opaque token).
    cursor: Option<String>,
}

/// Feed entry.
#[derive(Serialize, Clone, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StorySummary {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub cover_image_url: Option<String>,
    pub published_at: Option<String>,
}

impl From<Story> for StorySummary {
    fn from(story: Story) -> Self {
        Self {
            id: story.id,
            author_id: story.user_id,
            title: story.title,
            description: story.description,
            category: story.category,
            cover_image_url: story.cover_image_url,
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
pub struct FeedResponse {
    pub stories: Vec<StorySummary>,
    pub next_cursor: Option<String>,
    pub end_of_feed: bool,
}

impl From<FeedPage> for FeedResponse {
    fn from(page: FeedPage) -> Self {
        Self {
            end_of_feed: page.end_of_feed(),
            next_cursor: page.next_cursor.as_ref().map(FeedCursor::encode),
            stories: page.stories.into_iter().map(StorySummary::from).collect(),
        }
    }
}

/// Next page of published stories from followed authors.
async fn get_feed(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<FeedQuery>,
) -> Result<Json<FeedResponse>> {
    let cursor = params
        .cursor
        .as_deref()
        .map(FeedCursor::decode)
        .transpose()?;

    // A store failure ends the feed like any other feed query failure.
    let reader = match state.db.get_user(&user.user_id).await {
        Ok(Some(reader)) => reader,
        Ok(None) => {
            return Err(AppError::NotFound(format!(
                "User {} not found",
                user.user_id
            )))
        }
        Err(e) => {
            tracing::warn!(
                user_id = %user.user_id,
                error = %e,
                "Loading follow set failed, ending feed"
            );
            return Ok(Json(FeedPage::default().into()));
        }
    };

    tracing::debug!(
        user_id = %user.user_id,
        following = reader.following.len(),
        cursor = ?params.cursor,
        "Fetching feed"
    );

    let page = state
        .feed
        .next_page(
            &state.db,
            &user.feed_session(),
            &reader.following,
            cursor.as_ref(),
        )
        .await;

    Ok(Json(page.into()))
}
