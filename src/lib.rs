/*!
Play ingestion and counting.

Every listen event reported for a track is recorded, and each one is
classified as a counted play or not. Counted plays bump the track's
aggregate `plays` counter. See `ingest::PlayEngine::record_play`.
*/
use slog::o;
use slog::Drain;
use std::io::Read;
use std::{env, fs};

/// Build a json `tide::Response`
///
/// `resp!(json => value)` serializes `value` with a 200 status,
/// `resp!(status => 400, message => "...")` builds an error body.
#[macro_export]
macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, json => $obj:expr) => {{
        tide::Response::builder($status)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status)
            .body(serde_json::json!({ "error": $msg }))
            .build()
    }};
}

pub mod classifier;
pub mod clock;
pub mod crypto;
pub mod dedup;
pub mod errors;
pub mod ingest;
pub mod locks;
pub mod logging;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testing;

pub use errors::{PlayError, StoreError};
pub use ingest::PlayEngine;

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();

    // The "base" logger that all modules should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = CONFIG.log_level
                .parse()
                .expect("invalid log_level");
        if CONFIG.log_format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "playcount"));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub db_url: String,
    pub db_max_connections: u32,
    pub store: StoreKind,
    // secret used to key the HMAC over caller addresses. Changing it
    // starts every address off with a fresh dedup history.
    pub ip_hash_key: String,
    pub min_listen_seconds: u32,
    pub max_listen_seconds: u32,
    pub dedup_user_window_seconds: u64,
    pub dedup_session_window_seconds: u64,
    pub dedup_ip_window_seconds: u64,
    pub strict_dedup: bool,
    pub store_timeout_ms: u64,
    // zero disables the background reconciler
    pub reconcile_interval_seconds: u64,
}
impl Config {
    pub fn load() -> Self {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).expect("Error reading commit_hash");
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        let store = match env_or("STORE", "postgres").to_lowercase().trim() {
            "memory" => StoreKind::Memory,
            "postgres" => StoreKind::Postgres,
            other => panic!("invalid STORE {:?}, expected postgres or memory", other),
        };
        Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            port: env_or("PORT", "3030").parse().expect("invalid port"),
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            db_url: env_or("DATABASE_URL", "error"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", "5")
                .parse()
                .expect("invalid db_max_connections"),
            store,
            ip_hash_key: env_or("IP_HASH_KEY", "01234567890123456789012345678901"),
            min_listen_seconds: env_or("MIN_LISTEN_SECONDS", "30")
                .parse()
                .expect("invalid min_listen_seconds"),
            max_listen_seconds: env_or("MAX_LISTEN_SECONDS", "86400")
                .parse()
                .expect("invalid max_listen_seconds"),
            dedup_user_window_seconds: env_or("DEDUP_USER_WINDOW_SECONDS", "3600")
                .parse()
                .expect("invalid dedup_user_window_seconds"),
            dedup_session_window_seconds: env_or("DEDUP_SESSION_WINDOW_SECONDS", "3600")
                .parse()
                .expect("invalid dedup_session_window_seconds"),
            dedup_ip_window_seconds: env_or("DEDUP_IP_WINDOW_SECONDS", "3600")
                .parse()
                .expect("invalid dedup_ip_window_seconds"),
            strict_dedup: env_or("STRICT_DEDUP", "false") == "true",
            store_timeout_ms: env_or("STORE_TIMEOUT_MS", "5000")
                .parse()
                .expect("invalid store_timeout_ms"),
            reconcile_interval_seconds: env_or("RECONCILE_INTERVAL_SECONDS", "300")
                .parse()
                .expect("invalid reconcile_interval_seconds"),
        }
    }
    pub fn initialize(&self) -> anyhow::Result<()> {
        slog::info!(
            LOG, "initialized config";
            "version" => &self.version,
            "ssl" => &self.ssl,
            "host" => &self.host,
            "port" => &self.port,
            "log_format" => &self.log_format,
            "log_level" => &self.log_level,
            "store" => format!("{:?}", self.store),
            "min_listen_seconds" => self.min_listen_seconds,
            "max_listen_seconds" => self.max_listen_seconds,
            "dedup_user_window_seconds" => self.dedup_user_window_seconds,
            "dedup_session_window_seconds" => self.dedup_session_window_seconds,
            "dedup_ip_window_seconds" => self.dedup_ip_window_seconds,
            "strict_dedup" => self.strict_dedup,
            "store_timeout_ms" => self.store_timeout_ms,
            "reconcile_interval_seconds" => self.reconcile_interval_seconds,
        );
        if self.ip_hash_key.len() < 32 {
            anyhow::bail!("IP_HASH_KEY must be at least 32 bytes");
        }
        for (name, secs) in [
            ("DEDUP_USER_WINDOW_SECONDS", self.dedup_user_window_seconds),
            ("DEDUP_SESSION_WINDOW_SECONDS", self.dedup_session_window_seconds),
            ("DEDUP_IP_WINDOW_SECONDS", self.dedup_ip_window_seconds),
        ] {
            if secs > dedup::MAX_WINDOW_SECONDS {
                anyhow::bail!(
                    "{} must be at most {} seconds",
                    name,
                    dedup::MAX_WINDOW_SECONDS
                );
            }
        }
        Ok(())
    }
    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }
}
