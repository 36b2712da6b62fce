//! Database layer (Firestore).

pub mod firestore;

pub use firestore::{FirestoreDb, PublishOutcome};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const STORIES: &str = "stories";
    /// Chapters of a story (keyed by part id, linked via `story_id`)
    pub const STORY_PARTS: &str = "story_parts";
}
