// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! User model for storage and API.

use serde::{Deserialize, Serialize};

/// User profile stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Identity provider subject (also used as document ID)
    pub id: String,
    /// Display name (searchable by prefix)
    pub name: String,
    /// Email address
    pub email: String,
    /// Profile picture retrieval URL
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    /// Users following this user
    #[serde(default)]
    pub followers: Vec<String>,
    /// Users this user follows
    #[serde(default)]
    pub following: Vec<String>,
    /// When the profile was created at signup
    pub created_at: String,
}

impl User {
    /// Whether this user follows `user_id`.
    pub fn is_following(&self, user_id: &str) -> bool {
        self.following.iter().any(|id| id == user_id)
    }
}
