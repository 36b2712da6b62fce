// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.
//!
//! Stored timestamps are fixed-width RFC3339 strings so that Firestore's
//! lexicographic string ordering matches chronological ordering.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 with microseconds and a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in the stored timestamp format.
pub fn now_rfc3339() -> String {
    format_utc_rfc3339(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_sorts_chronologically() {
        let earlier = DateTime::from_timestamp(1_704_103_200, 0).unwrap();
        let later = DateTime::from_timestamp(1_704_103_200, 500_000_000).unwrap();

        let a = format_utc_rfc3339(earlier);
        let b = format_utc_rfc3339(later);

        assert_eq!(a, "2024-01-01T10:00:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
