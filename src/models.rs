use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Where a play was started from. Recorded for attribution only,
/// never an input to classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaySource {
    Search,
    Playlist,
    ArtistProfile,
    TipFeed,
    Direct,
}

impl PlaySource {
    pub const ALL: [PlaySource; 5] = [
        PlaySource::Search,
        PlaySource::Playlist,
        PlaySource::ArtistProfile,
        PlaySource::TipFeed,
        PlaySource::Direct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaySource::Search => "search",
            PlaySource::Playlist => "playlist",
            PlaySource::ArtistProfile => "artist_profile",
            PlaySource::TipFeed => "tip_feed",
            PlaySource::Direct => "direct",
        }
    }
}

impl Default for PlaySource {
    fn default() -> Self {
        PlaySource::Direct
    }
}

impl fmt::Display for PlaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlaySource::ALL
            .iter()
            .find(|src| src.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown play source {:?}", s))
    }
}

/// A listen event as reported by a caller, before validation.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayCandidate {
    pub track_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_id: String,
    // signed so that negative durations reach validation instead of
    // failing deserialization with an opaque message
    pub listen_duration_seconds: i64,
    #[serde(default)]
    pub completed_full: bool,
    #[serde(default)]
    pub source: PlaySource,
}

/// One recorded listen event. Immutable once created.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    pub id: Uuid,
    pub track_id: String,
    pub user_id: Option<String>,
    pub session_id: String,
    pub listen_duration_seconds: u32,
    pub completed_full: bool,
    pub source: PlaySource,
    // hex HMAC of the caller address, never the address itself
    pub ip_hash: String,
    pub counted_as_play: bool,
    pub played_at: DateTime<Utc>,
}

impl PlayEvent {
    /// The key a listener is identified by in listener rollups
    pub fn listener_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.session_id)
    }
}

/// The outcome of a `record_play` call
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub counted: bool,
    pub reason: Option<String>,
    pub event_id: Uuid,
}

/// Per-track sums the store computes for stats
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct TrackTotals {
    pub total_events: i64,
    pub counted_plays: i64,
    pub completed_plays: i64,
    pub total_listen_seconds: i64,
    pub unique_listeners: i64,
}

/// Counted plays for one track, used for top-track style listings
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrackRollup {
    pub track_id: String,
    pub plays: i64,
    pub completed_plays: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStats {
    pub track_id: String,
    pub total_plays: i64,
    pub unique_listeners: i64,
    pub completion_rate: f64,
    pub skip_rate: f64,
    pub avg_listen_duration: f64,
    pub period: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakdown {
    pub track_id: String,
    pub sources: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopTrack {
    pub track_id: String,
    pub plays: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopTracks {
    pub period: String,
    pub tracks: Vec<TopTrack>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistOverview {
    pub artist_id: String,
    pub total_plays: i64,
    pub unique_listeners: i64,
    pub total_tracks: i64,
    pub avg_completion_rate: f64,
    pub top_tracks: Vec<TopTrack>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub track_id: String,
    pub before: i64,
    pub after: i64,
}

impl ReconcileReport {
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}
