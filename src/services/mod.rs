// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod feed;
pub mod follow;
pub mod storage;

pub use feed::{FeedAssembler, FeedCursor, FeedPage, FeedSessionKey};
pub use follow::{FollowAction, FollowStatus};
pub use storage::StorageService;
