//! Shared fixtures for unit tests
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::models::{PlayEvent, PlaySource};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn event(
    track_id: &str,
    user_id: Option<&str>,
    session_id: &str,
    ip_hash: &str,
    counted: bool,
    played_at: DateTime<Utc>,
) -> PlayEvent {
    PlayEvent {
        id: Uuid::new_v4(),
        track_id: track_id.to_string(),
        user_id: user_id.map(|u| u.to_string()),
        session_id: session_id.to_string(),
        listen_duration_seconds: 60,
        completed_full: false,
        source: PlaySource::Direct,
        ip_hash: ip_hash.to_string(),
        counted_as_play: counted,
        played_at,
    }
}
