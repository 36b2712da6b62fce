// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Follow-graph updates.
//!
//! A follow edge A -> B is stored twice: B in `users/A.following` and A in
//! `users/B.followers`. Both sides change in one atomic store write, with set
//! semantics, so toggles are idempotent.

use crate::error::AppError;
use crate::models::User;
use serde::Serialize;
use std::future::Future;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Desired state of the edge from actor to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowAction {
    Follow,
    Unfollow,
}

/// Storage operations the follow-graph updater needs.
pub trait GraphStore {
    fn get_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<User>, AppError>> + Send;

    /// Atomically add (or remove) `target_id` in the actor's `following`
    /// and `actor_id` in the target's `followers`.
    fn apply_follow_edge(
        &self,
        actor_id: &str,
        target_id: &str,
        action: FollowAction,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Authoritative edge state read back after a follow/unfollow.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FollowStatus {
    pub target_id: String,
    /// Whether the actor now follows the target
    pub following: bool,
    pub target_followers_count: u32,
    pub actor_following_count: u32,
}

/// Set the follow edge from `actor_id` to `target_id`.
///
/// Repeating an action is a no-op that still succeeds. Failures are not
/// retried. On success both documents are re-read and the stored state is
/// returned.
pub async fn set_follow<S>(
    store: &S,
    actor_id: &str,
    target_id: &str,
    action: FollowAction,
) -> Result<FollowStatus, AppError>
where
    S: GraphStore + Sync,
{
    if actor_id == target_id {
        return Err(AppError::BadRequest("Users cannot follow themselves".to_string()));
    }

    if store.get_user(actor_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Profile for user {} not found",
            actor_id
        )));
    }
    if store.get_user(target_id).await?.is_none() {
        return Err(AppError::NotFound(format!("User {} not found", target_id)));
    }

    store.apply_follow_edge(actor_id, target_id, action).await?;

    read_follow_status(store, actor_id, target_id).await
}

/// Read the stored edge state between two users.
pub async fn read_follow_status<S>(
    store: &S,
    actor_id: &str,
    target_id: &str,
) -> Result<FollowStatus, AppError>
where
    S: GraphStore + Sync,
{
    let (actor, target) = futures_util::try_join!(
        store.get_user(actor_id),
        store.get_user(target_id)
    )?;

    let actor = actor
        .ok_or_else(|| AppError::NotFound(format!("Profile for user {} not found", actor_id)))?;
    let target = target.ok_or_else(|| AppError::NotFound(format!("User {} not found", target_id)))?;

    Ok(FollowStatus {
        target_id: target.id.clone(),
        following: actor.is_following(&target.id),
        target_followers_count: target.followers.len() as u32,
        actor_following_count: actor.following.len() as u32,
    })
}
