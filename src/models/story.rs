// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Story and story part models for storage and API.

use serde::{Deserialize, Serialize};
use validator::ValidationError;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Upper bound on the body of a single story part.
pub const MAX_PART_WORDS: usize = 5000;

/// Lifecycle status of a story. Only `Draft -> Published` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum StoryStatus {
    Draft,
    Published,
}

impl StoryStatus {
    /// Value stored in the `status` field (used in query filters).
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Published => "published",
        }
    }
}

/// Story document stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    /// Story ID (also used as document ID)
    pub id: String,
    /// Owner user ID
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    /// Cover image retrieval URL
    #[serde(default)]
    pub cover_image_url: Option<String>,
    pub status: StoryStatus,
    pub created_at: String,
    pub modified_at: String,
    /// Set once, when the story is published
    #[serde(default)]
    pub published_at: Option<String>,
}

impl Story {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn is_published(&self) -> bool {
        self.status == StoryStatus::Published
    }

    /// Drafts are private to their owner; published stories are public.
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.is_published() || self.is_owned_by(user_id)
    }
}

/// A chapter of a story, ordered by `written_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPart {
    /// Part ID (also used as document ID)
    pub id: String,
    /// Parent story ID
    pub story_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub written_at: String,
    pub modified_at: String,
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Validator hook rejecting part bodies longer than [`MAX_PART_WORDS`].
pub fn validate_part_words(content: &str) -> Result<(), ValidationError> {
    let words = word_count(content);
    if words > MAX_PART_WORDS {
        let mut err = ValidationError::new("too_many_words");
        err.message = Some(
            format!(
                "Story part has {} words; the limit is {}",
                words, MAX_PART_WORDS
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}
