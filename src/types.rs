//! Core type definitions for the application

use chrono::{DateTime, Duration, Utc};

/// OAuth token pair plus the time it was last replaced.
///
/// Replaced as a whole on every successful exchange or refresh; readers
/// always see either the previous pair or the new one, never a mix.
#[derive(Clone, Debug, Default)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub last_update: DateTime<Utc>,
}

impl Tokens {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            last_update: Utc::now(),
        }
    }

    /// A token pair is usable while the access token is non-empty and was
    /// replaced less than 24 hours ago.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub(crate) fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && now - self.last_update < Duration::hours(24)
    }
}

/// Metadata about the currently playing track
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub name: String,
    /// Comma-joined artist names, in the order the API lists them.
    pub artist: String,
    pub image_url: String,
    pub is_playing: bool,
}

impl Track {
    /// Placeholder shown when nothing is playing (the API answers 204).
    pub fn not_playing() -> Self {
        Self {
            name: "Not Playing".to_string(),
            artist: String::new(),
            image_url: String::new(),
            is_playing: false,
        }
    }
}

/// Transport commands the overlay can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackAction {
    Play,
    Pause,
    Next,
    Previous,
    Toggle,
}

/// One completed poll or command-triggered refresh, surfaced to the
/// display layer. Exactly one variant is sent per completed read.
#[derive(Clone, Debug)]
pub enum PlaybackUpdate {
    Track(Track),
    Error(String),
}
