use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::errors::StoreResult;
use crate::store::{bounded, DedupKey, DedupKind, PlayStore};

/// Longest window a key can be configured with
pub const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

/// A configured window in seconds, capped at `MAX_WINDOW_SECONDS`
pub fn window_from_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECONDS) as i64)
}

/// How far back each dedup key looks for a prior counted play.
/// A zero window turns that key's check off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupWindows {
    pub user: Duration,
    pub session: Duration,
    pub ip: Duration,
}

impl Default for DedupWindows {
    fn default() -> Self {
        Self::uniform(Duration::hours(1))
    }
}

impl DedupWindows {
    pub fn uniform(window: Duration) -> Self {
        Self {
            user: window,
            session: window,
            ip: window,
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            user: window_from_secs(config.dedup_user_window_seconds),
            session: window_from_secs(config.dedup_session_window_seconds),
            ip: window_from_secs(config.dedup_ip_window_seconds),
        }
    }

    pub fn for_kind(&self, kind: DedupKind) -> Duration {
        match kind {
            DedupKind::User => self.user,
            DedupKind::Session => self.session,
            DedupKind::IpHash => self.ip,
        }
    }
}

/// The identities of one candidate play
#[derive(Debug, Clone, Copy)]
pub struct DedupQuery<'a> {
    pub track_id: &'a str,
    pub user_id: Option<&'a str>,
    pub session_id: &'a str,
    pub ip_hash: &'a str,
}

impl<'a> DedupQuery<'a> {
    /// Keys in check order: user (when known), session, ip
    pub fn keys(&self) -> Vec<DedupKey<'a>> {
        let mut keys = Vec::with_capacity(3);
        if let Some(user) = self.user_id {
            keys.push(DedupKey::User(user));
        }
        keys.push(DedupKey::Session(self.session_id));
        keys.push(DedupKey::IpHash(self.ip_hash));
        keys
    }
}

/// Looks for prior counted plays of the same track by any of a
/// candidate's identities
#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn PlayStore>,
    windows: DedupWindows,
    timeout: std::time::Duration,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn PlayStore>, windows: DedupWindows, timeout: std::time::Duration) -> Self {
        Self {
            store,
            windows,
            timeout,
        }
    }

    pub fn windows(&self) -> &DedupWindows {
        &self.windows
    }

    /// The first key with a counted play of the track inside its
    /// window, which is `as_of - window <= played_at < as_of`
    pub async fn find_recent_counted_play(
        &self,
        query: &DedupQuery<'_>,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Option<DedupKind>> {
        for key in query.keys() {
            let window = self.windows.for_kind(key.kind());
            if window <= Duration::zero() {
                continue;
            }
            // a window reaching past chrono's range covers all history
            let since = as_of
                .checked_sub_signed(window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let found = bounded(
                self.timeout,
                self.store
                    .counted_play_exists(query.track_id, key, since, as_of),
            )
            .await?;
            if found {
                return Ok(Some(key.kind()));
            }
        }
        Ok(None)
    }

    pub async fn has_recent_counted_play(
        &self,
        query: &DedupQuery<'_>,
        as_of: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.find_recent_counted_play(query, as_of).await?.is_some())
    }
}
