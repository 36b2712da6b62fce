// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Home feed assembly.
//!
//! A feed page holds the most recently published stories by authors the
//! reader follows. Pages are cursor-paginated by `(published_at, id)` and
//! de-duplicated per login session: a story delivered once in a session is
//! not delivered again, even if the client re-requests earlier pages.

use crate::error::AppError;
use crate::models::Story;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Number of stories in a feed page.
pub const FEED_PAGE_SIZE: usize = 10;

/// Firestore accepts at most this many values in an `in` filter.
pub const MAX_IN_FILTER_VALUES: usize = 30;

/// Idle sessions are swept at most this often (or once per TTL, if shorter).
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Story IDs remembered per session; the oldest are forgotten first.
const MAX_SEEN_PER_SESSION: usize = 5_000;

const CURSOR_SEPARATOR: char = '|';

/// Position after which the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub published_at: String,
    pub story_id: String,
}

impl FeedCursor {
    fn from_story(story: &Story) -> Option<Self> {
        story.published_at.as_ref().map(|published_at| Self {
            published_at: published_at.clone(),
            story_id: story.id.clone(),
        })
    }

    /// Encode as an opaque URL-safe token.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!(
            "{}{}{}",
            self.published_at, CURSOR_SEPARATOR, self.story_id
        ))
    }

    /// Decode a token produced by [`FeedCursor::encode`].
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        let invalid_cursor = || AppError::BadRequest("Invalid 'cursor' parameter".to_string());

        let decoded = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid_cursor())?;
        let decoded_str = std::str::from_utf8(&decoded).map_err(|_| invalid_cursor())?;

        let (published_at, story_id) = decoded_str
            .split_once(CURSOR_SEPARATOR)
            .ok_or_else(invalid_cursor)?;

        chrono::DateTime::parse_from_rfc3339(published_at).map_err(|_| invalid_cursor())?;
        if story_id.is_empty() {
            return Err(invalid_cursor());
        }

        Ok(Self {
            published_at: published_at.to_string(),
            story_id: story_id.to_string(),
        })
    }
}

/// Source of published stories, implemented by the document store.
pub trait FeedSource {
    /// Published stories by any of `authors` (at most [`MAX_IN_FILTER_VALUES`]),
    /// ordered by `(published_at, id)` descending, strictly after `after`.
    fn published_by_authors(
        &self,
        authors: &[String],
        after: Option<&FeedCursor>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Story>, AppError>> + Send;
}

/// One page of the feed.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub stories: Vec<Story>,
    pub next_cursor: Option<FeedCursor>,
}

impl FeedPage {
    /// True once no further page can be requested.
    pub fn end_of_feed(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Identifies a login session: the user plus the token's issue time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedSessionKey {
    pub user_id: String,
    pub issued_at: usize,
}

struct SeenStories {
    ids: HashSet<String>,
    order: VecDeque<String>,
    last_used: Instant,
}

impl SeenStories {
    fn new() -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            last_used: Instant::now(),
        }
    }

    /// Record `id`; false if it was already delivered.
    fn admit(&mut self, id: &str, capacity: usize) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Builds feed pages and remembers what each session has already seen.
pub struct FeedAssembler {
    sessions: DashMap<FeedSessionKey, SeenStories>,
    session_ttl: Duration,
    started: Instant,
    /// Milliseconds after `started` of the last idle-session sweep.
    last_sweep_ms: AtomicU64,
}

impl FeedAssembler {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            session_ttl,
            started: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Produce the next feed page for `session`.
    ///
    /// Query failures are not retried; they end the feed with an empty page.
    pub async fn next_page<S>(
        &self,
        source: &S,
        session: &FeedSessionKey,
        following: &[String],
        cursor: Option<&FeedCursor>,
    ) -> FeedPage
    where
        S: FeedSource + Sync,
    {
        let window = match fetch_window(source, following, cursor).await {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(
                    user_id = %session.user_id,
                    error = %e,
                    "Feed query failed, ending feed"
                );
                return FeedPage::default();
            }
        };

        let stories = self.admit_unseen(session, window.stories);

        tracing::debug!(
            user_id = %session.user_id,
            delivered = stories.len(),
            has_more = window.next_cursor.is_some(),
            "Feed page assembled"
        );

        FeedPage {
            stories,
            next_cursor: window.next_cursor,
        }
    }

    /// Drop stories this session already received and record the rest.
    fn admit_unseen(&self, session: &FeedSessionKey, stories: Vec<Story>) -> Vec<Story> {
        self.evict_idle_sessions();

        let mut entry = self
            .sessions
            .entry(session.clone())
            .or_insert_with(SeenStories::new);
        entry.last_used = Instant::now();

        stories
            .into_iter()
            .filter(|story| entry.admit(&story.id, MAX_SEEN_PER_SESSION))
            .collect()
    }

    /// Drop sessions idle for longer than the TTL.
    ///
    /// Runs at most once per sweep interval; concurrent callers race on the
    /// timestamp and only the winner walks the map.
    fn evict_idle_sessions(&self) {
        let interval = self.session_ttl.min(MAX_SWEEP_INTERVAL).as_millis() as u64;
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Acquire);

        if now.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let ttl = self.session_ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, seen| seen.last_used.elapsed() < ttl);
        tracing::debug!(
            evicted = before.saturating_sub(self.sessions.len()),
            remaining = self.sessions.len(),
            "Swept idle feed sessions"
        );
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Query every author chunk and merge into one ordered page window.
async fn fetch_window<S>(
    source: &S,
    following: &[String],
    cursor: Option<&FeedCursor>,
) -> Result<FeedPage, AppError>
where
    S: FeedSource + Sync,
{
    let authors: Vec<String> = following
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect();

    if authors.is_empty() {
        return Ok(FeedPage::default());
    }

    // One extra row tells us whether another page exists.
    let fetch_limit = (FEED_PAGE_SIZE + 1) as u32;

    let batches = futures_util::future::try_join_all(
        authors
            .chunks(MAX_IN_FILTER_VALUES)
            .map(|chunk| source.published_by_authors(chunk, cursor, fetch_limit)),
    )
    .await?;

    let author_set: HashSet<&str> = authors.iter().map(String::as_str).collect();
    Ok(merge_batches(batches, &author_set))
}

/// Merge per-chunk results into a single page window.
///
/// Rows that are unpublished or by authors outside `authors` are discarded,
/// whatever the source returned.
pub fn merge_batches(batches: Vec<Vec<Story>>, authors: &HashSet<&str>) -> FeedPage {
    let mut merged: Vec<Story> = batches
        .into_iter()
        .flatten()
        .filter(|story| {
            story.is_published()
                && story.published_at.is_some()
                && authors.contains(story.user_id.as_str())
        })
        .collect();

    merged.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    merged.dedup_by(|a, b| a.id == b.id);

    let has_more = merged.len() > FEED_PAGE_SIZE;
    merged.truncate(FEED_PAGE_SIZE);

    let next_cursor = if has_more {
        merged.last().and_then(FeedCursor::from_story)
    } else {
        None
    };

    FeedPage {
        stories: merged,
        next_cursor,
    }
}
