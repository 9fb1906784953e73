/*!
Event store and track aggregates.

`PlayStore` is the only thing the engine knows about persistence.
Implementations:
- `PgStore`: PostgreSQL, the production store
- `MemoryStore`: in-process, for tests and local runs
*/
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{StoreError, StoreResult};
use crate::models::{PlayEvent, PlaySource, TrackRollup, TrackTotals};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which identity a duplicate check matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupKind {
    User,
    Session,
    IpHash,
}

impl DedupKind {
    /// How the key reads in a rejection reason
    pub fn describe(&self) -> &'static str {
        match self {
            DedupKind::User => "for this user",
            DedupKind::Session => "for this session",
            DedupKind::IpHash => "from this network address",
        }
    }
}

/// A dedup key and the value to match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey<'a> {
    User(&'a str),
    Session(&'a str),
    IpHash(&'a str),
}

impl<'a> DedupKey<'a> {
    pub fn kind(&self) -> DedupKind {
        match self {
            DedupKey::User(_) => DedupKind::User,
            DedupKey::Session(_) => DedupKind::Session,
            DedupKey::IpHash(_) => DedupKind::IpHash,
        }
    }

    pub fn value(&self) -> &'a str {
        match *self {
            DedupKey::User(v) | DedupKey::Session(v) | DedupKey::IpHash(v) => v,
        }
    }

    pub fn matches(&self, event: &PlayEvent) -> bool {
        match *self {
            DedupKey::User(v) => event.user_id.as_deref() == Some(v),
            DedupKey::Session(v) => event.session_id == v,
            DedupKey::IpHash(v) => event.ip_hash == v,
        }
    }
}

/// Run a store call, failing it if it hasn't finished within `limit`
pub async fn bounded<F, T>(limit: std::time::Duration, fut: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    async_std::future::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[async_trait]
pub trait PlayStore: Send + Sync {
    /// Append one event to the log
    async fn append(&self, event: &PlayEvent) -> StoreResult<()>;

    /// Is there a counted play of `track_id` matching `key` with
    /// `since <= played_at < before`
    async fn counted_play_exists(
        &self,
        track_id: &str,
        key: DedupKey<'_>,
        since: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Atomically add one to the track's aggregate, creating it at
    /// zero first if it doesn't exist yet
    async fn increment_track_plays(&self, track_id: &str) -> StoreResult<()>;

    /// Current aggregate, zero for unknown tracks
    async fn track_plays(&self, track_id: &str) -> StoreResult<i64>;

    /// Set the aggregate to the number of counted events in the log.
    /// Returns the aggregate before and after.
    async fn reconcile_track_plays(&self, track_id: &str) -> StoreResult<(i64, i64)>;

    /// Every track with an aggregate row or at least one event
    async fn known_track_ids(&self) -> StoreResult<Vec<String>>;

    /// Associate a track with its artist
    async fn register_track(&self, track_id: &str, artist_id: Option<&str>) -> StoreResult<()>;

    async fn track_totals(&self, track_id: &str, since: DateTime<Utc>) -> StoreResult<TrackTotals>;

    /// Counted plays per source, only sources with plays
    async fn source_counts(&self, track_id: &str) -> StoreResult<Vec<(PlaySource, i64)>>;

    /// Counted plays per track since `since`, most played first
    async fn top_tracks(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<TrackRollup>>;

    /// Counted plays per track of an artist, most played first
    async fn artist_rollups(&self, artist_id: &str) -> StoreResult<Vec<TrackRollup>>;

    /// Distinct listeners over every counted play of an artist
    async fn artist_unique_listeners(&self, artist_id: &str) -> StoreResult<i64>;
}
