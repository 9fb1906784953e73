use std::sync::Arc;

use uuid::Uuid;

use crate::classifier::{PlayClassifier, MINIMUM_LISTEN_SECONDS};
use crate::clock::Clock;
use crate::crypto::IpHasher;
use crate::dedup::{DedupQuery, DedupWindows, DuplicateDetector};
use crate::errors::{PlayError, Result, StoreError};
use crate::locks::KeyLocks;
use crate::models::{PlayCandidate, PlayEvent, PlaySource, Verdict};
use crate::store::{bounded, PlayStore};
use crate::LOG;

pub const MAX_LISTEN_SECONDS: u32 = 24 * 60 * 60;
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Tunables for classification and store access
#[derive(Debug, Clone)]
pub struct PlayRules {
    pub min_listen_seconds: u32,
    pub max_listen_seconds: u32,
    pub windows: DedupWindows,
    /// serialize plays per (track, session) while classifying
    pub strict_dedup: bool,
    pub store_timeout: std::time::Duration,
}

impl Default for PlayRules {
    fn default() -> Self {
        Self {
            min_listen_seconds: MINIMUM_LISTEN_SECONDS,
            max_listen_seconds: MAX_LISTEN_SECONDS,
            windows: DedupWindows::default(),
            strict_dedup: false,
            store_timeout: std::time::Duration::from_secs(5),
        }
    }
}

impl PlayRules {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            min_listen_seconds: config.min_listen_seconds,
            max_listen_seconds: config.max_listen_seconds,
            windows: DedupWindows::from_config(config),
            strict_dedup: config.strict_dedup,
            store_timeout: std::time::Duration::from_millis(config.store_timeout_ms),
        }
    }
}

/// A candidate that passed validation
#[derive(Debug, Clone, PartialEq)]
struct ValidPlay {
    track_id: String,
    user_id: Option<String>,
    session_id: String,
    listen_seconds: u32,
    completed_full: bool,
    source: PlaySource,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn validate(
    candidate: PlayCandidate,
    caller_user_id: Option<&str>,
    max_listen_seconds: u32,
) -> Result<ValidPlay> {
    let track_id =
        non_empty(&candidate.track_id).ok_or_else(|| PlayError::validation("trackId is required"))?;
    let session_id = non_empty(&candidate.session_id)
        .ok_or_else(|| PlayError::validation("sessionId is required"))?;
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(PlayError::validation(format!(
            "sessionId must be at most {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    let secs = candidate.listen_duration_seconds;
    if secs < 0 {
        return Err(PlayError::validation(
            "listenDurationSeconds must not be negative",
        ));
    }
    if secs > max_listen_seconds as i64 {
        return Err(PlayError::validation(format!(
            "listenDurationSeconds must be at most {}",
            max_listen_seconds
        )));
    }
    // the identity layer's answer wins over whatever the body claims
    let user_id = caller_user_id
        .and_then(non_empty)
        .or_else(|| candidate.user_id.as_deref().and_then(non_empty));
    Ok(ValidPlay {
        track_id,
        user_id,
        session_id,
        listen_seconds: secs as u32,
        completed_full: candidate.completed_full,
        source: candidate.source,
    })
}

/// Records listen events and keeps track play counts.
///
/// The engine holds no per-play state between calls: dedup history
/// and aggregates live in the store.
pub struct PlayEngine {
    store: Arc<dyn PlayStore>,
    classifier: PlayClassifier,
    hasher: IpHasher,
    clock: Arc<dyn Clock>,
    rules: PlayRules,
    locks: KeyLocks,
}

impl PlayEngine {
    pub fn new(
        store: Arc<dyn PlayStore>,
        rules: PlayRules,
        hasher: IpHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let detector = DuplicateDetector::new(store.clone(), rules.windows, rules.store_timeout);
        let classifier = PlayClassifier::new(rules.min_listen_seconds, detector);
        Self {
            store,
            classifier,
            hasher,
            clock,
            rules,
            locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PlayStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn rules(&self) -> &PlayRules {
        &self.rules
    }

    /// Validate, classify, and record one listen event.
    ///
    /// Malformed candidates fail with `PlayError::Validation` and
    /// leave no trace. Everything else is appended to the event log
    /// exactly once, counted or not, and counted plays bump the track
    /// aggregate exactly once.
    pub async fn record_play(
        &self,
        candidate: PlayCandidate,
        caller_user_id: Option<&str>,
        caller_ip: &str,
    ) -> Result<Verdict> {
        let play = validate(candidate, caller_user_id, self.rules.max_listen_seconds)?;
        if caller_ip.trim().is_empty() {
            return Err(PlayError::validation("caller address is required"));
        }
        let ip_hash = self.hasher.hash(caller_ip);

        let _guard = if self.rules.strict_dedup {
            Some(self.locks.lock(&play.track_id, &play.session_id).await)
        } else {
            None
        };

        let as_of = self.clock.now();
        let query = DedupQuery {
            track_id: &play.track_id,
            user_id: play.user_id.as_deref(),
            session_id: &play.session_id,
            ip_hash: &ip_hash,
        };
        let classification = self
            .classifier
            .classify(&query, play.listen_seconds, as_of)
            .await?;

        let event = PlayEvent {
            id: Uuid::new_v4(),
            track_id: play.track_id,
            user_id: play.user_id,
            session_id: play.session_id,
            listen_duration_seconds: play.listen_seconds,
            completed_full: play.completed_full,
            source: play.source,
            ip_hash,
            counted_as_play: classification.counted,
            played_at: as_of,
        };
        if let Err(e) = bounded(self.rules.store_timeout, self.store.append(&event)).await {
            if let StoreError::Timeout(_) = e {
                // the insert may have committed before we stopped waiting;
                // reconciliation settles the aggregate if it did
                slog::error!(
                    LOG, "append outcome unknown";
                    "track_id" => &event.track_id,
                    "event_id" => %event.id,
                    "counted" => event.counted_as_play,
                    "error" => %e,
                );
            }
            return Err(e.into());
        }

        let verdict = Verdict {
            counted: classification.counted,
            reason: classification.reason,
            event_id: event.id,
        };
        if !verdict.counted {
            slog::debug!(
                LOG, "play not counted";
                "track_id" => &event.track_id,
                "event_id" => %event.id,
                "reason" => verdict.reason.as_deref().unwrap_or(""),
            );
            return Ok(verdict);
        }

        if let Err(e) = bounded(
            self.rules.store_timeout,
            self.store.increment_track_plays(&event.track_id),
        )
        .await
        {
            slog::error!(
                LOG, "counted play recorded but aggregate increment failed";
                "track_id" => &event.track_id,
                "event_id" => %event.id,
                "error" => %e,
            );
            return Err(PlayError::AggregateIncrement { verdict, source: e });
        }
        slog::info!(
            LOG, "counted play";
            "track_id" => &event.track_id,
            "event_id" => %event.id,
            "listener" => event.listener_key(),
            "source" => event.source.as_str(),
        );
        Ok(verdict)
    }

    /// Attach a track to its artist so it shows up in artist rollups.
    /// Registering again moves the track to the new artist.
    pub async fn register_track(&self, track_id: &str, artist_id: &str) -> Result<()> {
        let track_id = non_empty(track_id).ok_or_else(|| PlayError::validation("trackId is required"))?;
        let artist_id =
            non_empty(artist_id).ok_or_else(|| PlayError::validation("artistId is required"))?;
        bounded(
            self.rules.store_timeout,
            self.store.register_track(&track_id, Some(&artist_id)),
        )
        .await?;
        slog::info!(
            LOG, "registered track";
            "track_id" => &track_id,
            "artist_id" => &artist_id,
        );
        Ok(())
    }
}
