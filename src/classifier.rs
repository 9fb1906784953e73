use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::dedup::{DedupQuery, DuplicateDetector};
use crate::errors::StoreResult;
use crate::store::DedupKind;

pub const MINIMUM_LISTEN_SECONDS: u32 = 30;

/// Why a well-formed play was not counted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TooShort { minimum: u32 },
    Duplicate { kind: DedupKind, window: Duration },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort { minimum } => {
                write!(f, "Listen duration below {} seconds minimum", minimum)
            }
            Rejection::Duplicate { kind, window } => write!(
                f,
                "Duplicate play within {} {}",
                describe_window(*window),
                kind.describe()
            ),
        }
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// "1 hour", "90 minutes", "45 seconds"
pub fn describe_window(window: Duration) -> String {
    let secs = window.num_seconds();
    if secs > 0 && secs % 3600 == 0 {
        plural(secs / 3600, "hour")
    } else if secs > 0 && secs % 60 == 0 {
        plural(secs / 60, "minute")
    } else {
        plural(secs, "second")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub counted: bool,
    pub reason: Option<String>,
}

impl From<Option<Rejection>> for Classification {
    fn from(rejection: Option<Rejection>) -> Self {
        match rejection {
            None => Classification {
                counted: true,
                reason: None,
            },
            Some(r) => Classification {
                counted: false,
                reason: Some(r.to_string()),
            },
        }
    }
}

/// Decides whether a play counts. Rules run in order and the
/// first one that rejects wins:
///   1. at least `min_listen_seconds` listened
///   2. no prior counted play by any of the play's identities
///      inside that identity's window
#[derive(Clone)]
pub struct PlayClassifier {
    min_listen_seconds: u32,
    detector: DuplicateDetector,
}

impl PlayClassifier {
    pub fn new(min_listen_seconds: u32, detector: DuplicateDetector) -> Self {
        Self {
            min_listen_seconds,
            detector,
        }
    }

    pub fn check_engagement(&self, listen_seconds: u32) -> Option<Rejection> {
        if listen_seconds < self.min_listen_seconds {
            Some(Rejection::TooShort {
                minimum: self.min_listen_seconds,
            })
        } else {
            None
        }
    }

    pub async fn check_duplicate(
        &self,
        query: &DedupQuery<'_>,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Option<Rejection>> {
        let found = self.detector.find_recent_counted_play(query, as_of).await?;
        Ok(found.map(|kind| Rejection::Duplicate {
            kind,
            window: self.detector.windows().for_kind(kind),
        }))
    }

    pub async fn classify(
        &self,
        query: &DedupQuery<'_>,
        listen_seconds: u32,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Classification> {
        if let Some(rejection) = self.check_engagement(listen_seconds) {
            return Ok(Some(rejection).into());
        }
        Ok(self.check_duplicate(query, as_of).await?.into())
    }
}
