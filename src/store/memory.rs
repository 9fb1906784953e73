use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_mutex::Mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DedupKey, PlayStore};
use crate::errors::{StoreError, StoreResult};
use crate::models::{PlayEvent, PlaySource, TrackRollup, TrackTotals};

#[derive(Default)]
struct Inner {
    events: Vec<PlayEvent>,
    plays: HashMap<String, i64>,
    artists: HashMap<String, String>,
}

/// Event store held in process memory.
///
/// Every operation runs under one lock, so each call is atomic the
/// same way a single statement is in postgres. The `fail_*` switches
/// make the next calls fail, for exercising partial failures.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_appends: AtomicBool,
    fail_increments: AtomicBool,
    stall_after_append: AtomicBool,
    increments: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    /// Appends still land but never return, like an insert that
    /// committed before its connection went quiet
    pub fn stall_after_append(&self, stall: bool) {
        self.stall_after_append.store(stall, Ordering::SeqCst);
    }

    /// Number of successful aggregate increments
    pub fn increment_count(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub async fn events(&self) -> Vec<PlayEvent> {
        self.inner.lock().await.events.clone()
    }

    /// Overwrite an aggregate directly, bypassing the event log
    pub async fn force_track_plays(&self, track_id: &str, plays: i64) {
        self.inner
            .lock()
            .await
            .plays
            .insert(track_id.to_string(), plays);
    }
}

fn rollups<'a, I>(events: I) -> Vec<TrackRollup>
where
    I: Iterator<Item = &'a PlayEvent>,
{
    let mut by_track: HashMap<&str, (i64, i64)> = HashMap::new();
    for e in events {
        let entry = by_track.entry(e.track_id.as_str()).or_default();
        entry.0 += 1;
        if e.completed_full {
            entry.1 += 1;
        }
    }
    let mut rollups = by_track
        .into_iter()
        .map(|(track_id, (plays, completed_plays))| TrackRollup {
            track_id: track_id.to_string(),
            plays,
            completed_plays,
        })
        .collect::<Vec<_>>();
    rollups.sort_by(|a, b| b.plays.cmp(&a.plays).then_with(|| a.track_id.cmp(&b.track_id)));
    rollups
}

#[async_trait]
impl PlayStore for MemoryStore {
    async fn append(&self, event: &PlayEvent) -> StoreResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("append disabled".into()));
        }
        self.inner.lock().await.events.push(event.clone());
        if self.stall_after_append.load(Ordering::SeqCst) {
            async_std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn counted_play_exists(
        &self,
        track_id: &str,
        key: DedupKey<'_>,
        since: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.events.iter().any(|e| {
            e.track_id == track_id
                && e.counted_as_play
                && e.played_at >= since
                && e.played_at < before
                && key.matches(e)
        }))
    }

    async fn increment_track_plays(&self, track_id: &str) -> StoreResult<()> {
        if self.fail_increments.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("increment disabled".into()));
        }
        let mut inner = self.inner.lock().await;
        *inner.plays.entry(track_id.to_string()).or_insert(0) += 1;
        self.increments.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn track_plays(&self, track_id: &str) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner.plays.get(track_id).copied().unwrap_or(0))
    }

    async fn reconcile_track_plays(&self, track_id: &str) -> StoreResult<(i64, i64)> {
        let mut inner = self.inner.lock().await;
        let counted = inner
            .events
            .iter()
            .filter(|e| e.track_id == track_id && e.counted_as_play)
            .count() as i64;
        let before = inner
            .plays
            .insert(track_id.to_string(), counted)
            .unwrap_or(0);
        Ok((before, counted))
    }

    async fn known_track_ids(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let ids = inner
            .plays
            .keys()
            .map(|k| k.as_str())
            .chain(inner.events.iter().map(|e| e.track_id.as_str()))
            .map(|k| k.to_string())
            .collect::<BTreeSet<_>>();
        Ok(ids.into_iter().collect())
    }

    async fn register_track(&self, track_id: &str, artist_id: Option<&str>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.plays.entry(track_id.to_string()).or_insert(0);
        match artist_id {
            Some(artist) => inner
                .artists
                .insert(track_id.to_string(), artist.to_string()),
            None => inner.artists.remove(track_id),
        };
        Ok(())
    }

    async fn track_totals(&self, track_id: &str, since: DateTime<Utc>) -> StoreResult<TrackTotals> {
        let inner = self.inner.lock().await;
        let mut totals = TrackTotals::default();
        let mut listeners = HashSet::new();
        for e in inner
            .events
            .iter()
            .filter(|e| e.track_id == track_id && e.played_at >= since)
        {
            totals.total_events += 1;
            totals.total_listen_seconds += e.listen_duration_seconds as i64;
            if e.counted_as_play {
                totals.counted_plays += 1;
                if e.completed_full {
                    totals.completed_plays += 1;
                }
                listeners.insert(e.listener_key());
            }
        }
        totals.unique_listeners = listeners.len() as i64;
        Ok(totals)
    }

    async fn source_counts(&self, track_id: &str) -> StoreResult<Vec<(PlaySource, i64)>> {
        let inner = self.inner.lock().await;
        let mut counts: HashMap<PlaySource, i64> = HashMap::new();
        for e in inner
            .events
            .iter()
            .filter(|e| e.track_id == track_id && e.counted_as_play)
        {
            *counts.entry(e.source).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn top_tracks(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<TrackRollup>> {
        let inner = self.inner.lock().await;
        let mut top = rollups(
            inner
                .events
                .iter()
                .filter(|e| e.counted_as_play && e.played_at >= since),
        );
        top.truncate(limit.max(0) as usize);
        Ok(top)
    }

    async fn artist_rollups(&self, artist_id: &str) -> StoreResult<Vec<TrackRollup>> {
        let inner = self.inner.lock().await;
        let artists = &inner.artists;
        Ok(rollups(inner.events.iter().filter(|e| {
            e.counted_as_play && artists.get(&e.track_id).map(|a| a.as_str()) == Some(artist_id)
        })))
    }

    async fn artist_unique_listeners(&self, artist_id: &str) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        let listeners = inner
            .events
            .iter()
            .filter(|e| {
                e.counted_as_play
                    && inner.artists.get(&e.track_id).map(|a| a.as_str()) == Some(artist_id)
            })
            .map(|e| e.listener_key())
            .collect::<HashSet<_>>();
        Ok(listeners.len() as i64)
    }
}
