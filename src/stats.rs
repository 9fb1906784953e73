/*!
Read-side rollups over the event log
*/
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::errors::{PlayError, Result};
use crate::ingest::PlayEngine;
use crate::models::{
    ArtistOverview, PlaySource, SourceBreakdown, TopTrack, TopTracks, TrackRollup, TrackStats,
};
use crate::store::bounded;

pub const DEFAULT_PERIOD: &str = "7d";
pub const DEFAULT_TOP_LIMIT: i64 = 20;
pub const MAX_TOP_LIMIT: i64 = 100;
const ARTIST_TOP_TRACKS: usize = 5;
// a century is plenty and keeps chrono well inside its range
const MAX_PERIOD_HOURS: i64 = 24 * 365 * 100;

/// Parse a period like `12h`, `7d`, `4w`, or `1m` (30 days) into the
/// instant it starts at, counting back from `now`
pub fn period_start(period: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let invalid = || PlayError::InvalidPeriod(period.to_string());
    let period = period.trim();
    let unit = period.chars().last().ok_or_else(invalid)?;
    let digits = &period[..period.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    let hours_per_unit = match unit {
        'h' => 1,
        'd' => 24,
        'w' => 24 * 7,
        'm' => 24 * 30,
        _ => return Err(invalid()),
    };
    let hours = value
        .checked_mul(hours_per_unit)
        .filter(|h| *h <= MAX_PERIOD_HOURS)
        .ok_or_else(invalid)?;
    now.checked_sub_signed(Duration::hours(hours))
        .ok_or_else(invalid)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn ratio(num: i64, den: i64) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

fn top_track(rollup: &TrackRollup) -> TopTrack {
    TopTrack {
        track_id: rollup.track_id.clone(),
        plays: rollup.plays,
        completion_rate: round_to(ratio(rollup.completed_plays, rollup.plays), 4),
    }
}

pub async fn track_stats(engine: &PlayEngine, track_id: &str, period: &str) -> Result<TrackStats> {
    let since = period_start(period, engine.clock().now())?;
    let timeout = engine.rules().store_timeout;
    let totals = bounded(timeout, engine.store().track_totals(track_id, since)).await?;
    let skipped = totals.total_events - totals.counted_plays;
    Ok(TrackStats {
        track_id: track_id.to_string(),
        total_plays: totals.counted_plays,
        unique_listeners: totals.unique_listeners,
        completion_rate: round_to(ratio(totals.completed_plays, totals.counted_plays), 4),
        skip_rate: round_to(ratio(skipped, totals.total_events), 4),
        avg_listen_duration: round_to(ratio(totals.total_listen_seconds, totals.total_events), 2),
        period: period.trim().to_string(),
    })
}

/// Counted plays per source, every source present
pub async fn track_sources(engine: &PlayEngine, track_id: &str) -> Result<SourceBreakdown> {
    let timeout = engine.rules().store_timeout;
    let counts = bounded(timeout, engine.store().source_counts(track_id)).await?;
    let mut sources = PlaySource::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect::<BTreeMap<_, _>>();
    for (source, count) in counts {
        sources.insert(source.as_str().to_string(), count);
    }
    Ok(SourceBreakdown {
        track_id: track_id.to_string(),
        sources,
    })
}

pub async fn artist_overview(engine: &PlayEngine, artist_id: &str) -> Result<ArtistOverview> {
    let timeout = engine.rules().store_timeout;
    let rollups = bounded(timeout, engine.store().artist_rollups(artist_id)).await?;
    let unique_listeners =
        bounded(timeout, engine.store().artist_unique_listeners(artist_id)).await?;
    let total_plays = rollups.iter().map(|r| r.plays).sum();
    let avg_completion_rate = if rollups.is_empty() {
        0.0
    } else {
        rollups
            .iter()
            .map(|r| ratio(r.completed_plays, r.plays))
            .sum::<f64>()
            / rollups.len() as f64
    };
    Ok(ArtistOverview {
        artist_id: artist_id.to_string(),
        total_plays,
        unique_listeners,
        total_tracks: rollups.len() as i64,
        avg_completion_rate: round_to(avg_completion_rate, 4),
        top_tracks: rollups.iter().take(ARTIST_TOP_TRACKS).map(top_track).collect(),
    })
}

pub async fn top_tracks(engine: &PlayEngine, period: &str, limit: Option<i64>) -> Result<TopTracks> {
    let since = period_start(period, engine.clock().now())?;
    let limit = limit.unwrap_or(DEFAULT_TOP_LIMIT).max(1).min(MAX_TOP_LIMIT);
    let timeout = engine.rules().store_timeout;
    let rollups = bounded(timeout, engine.store().top_tracks(since, limit)).await?;
    Ok(TopTracks {
        period: period.trim().to_string(),
        tracks: rollups.iter().map(top_track).collect(),
    })
}
