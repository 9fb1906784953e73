use std::sync::Arc;

use crate::errors::PlayError;
use crate::ingest::PlayEngine;
use crate::models::{PlayCandidate, Verdict};
use crate::{reconcile, stats, CONFIG, LOG};

#[derive(Clone)]
pub struct Context {
    engine: Arc<PlayEngine>,
}

pub fn build_app(engine: Arc<PlayEngine>) -> tide::Server<Context> {
    let ctx = Context { engine };
    let mut app = tide::with_state(ctx);
    app.at("/api/status").get(status);
    app.at("/api/plays/record").post(record_play);
    app.at("/api/plays/track/:track_id/stats").get(track_stats);
    app.at("/api/plays/track/:track_id/sources").get(track_sources);
    app.at("/api/plays/track/:track_id/reconcile").post(reconcile_track);
    app.at("/api/plays/track/:track_id/artist").put(register_track);
    app.at("/api/plays/artist/:artist_id/overview").get(artist_overview);
    app.at("/api/plays/top-tracks").get(top_tracks);
    app.with(crate::logging::LogMiddleware::new());
    app
}

pub async fn start(engine: Arc<PlayEngine>) -> anyhow::Result<()> {
    let app = build_app(engine);
    slog::info!(LOG, "running at {}", CONFIG.host());
    app.listen(CONFIG.host()).await?;
    Ok(())
}

fn error_response(e: PlayError) -> tide::Result {
    let status = e.status();
    if status >= 500 {
        slog::error!(LOG, "play request failed"; "error" => %e);
        return Ok(resp!(status => status, message => "internal store error"));
    }
    Ok(resp!(status => status, message => e.to_string()))
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(_req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &CONFIG.version
    }))
}

/// The address the request came from: the first forwarded hop if a
/// proxy told us, otherwise the peer
fn caller_addr<State>(req: &tide::Request<State>) -> String {
    req.remote()
        .and_then(|r| r.split(',').next())
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordPlayResponse {
    counted: bool,
    reason: Option<String>,
    event_id: uuid::Uuid,
    // the play is in the log but the track total hasn't caught up
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    aggregate_pending: bool,
}

impl RecordPlayResponse {
    fn new(verdict: Verdict, aggregate_pending: bool) -> Self {
        Self {
            counted: verdict.counted,
            reason: verdict.reason,
            event_id: verdict.event_id,
            aggregate_pending,
        }
    }
}

async fn record_play(mut req: tide::Request<Context>) -> tide::Result {
    let candidate: PlayCandidate = match req.body_json().await {
        Ok(c) => c,
        Err(e) => {
            slog::info!(LOG, "invalid play body {}", e);
            return Ok(resp!(status => 400, message => format!("invalid play body: {}", e)));
        }
    };
    let caller_ip = caller_addr(&req);
    let caller_user = req
        .header("x-user-id")
        .map(|values| values.last().as_str().to_string());
    let engine = req.state().engine.clone();
    match engine
        .record_play(candidate, caller_user.as_deref(), &caller_ip)
        .await
    {
        Ok(verdict) => Ok(resp!(json => RecordPlayResponse::new(verdict, false))),
        // already logged by the engine, reconciliation picks it up
        Err(PlayError::AggregateIncrement { verdict, .. }) => {
            Ok(resp!(json => RecordPlayResponse::new(verdict, true)))
        }
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
struct PeriodParams {
    period: Option<String>,
    limit: Option<i64>,
}

macro_rules! params_or_error {
    ($req:expr) => {{
        match $req.query::<PeriodParams>() {
            Err(e) => {
                slog::error!(LOG, "invalid query params {:?}", e);
                return Ok(resp!(status => 400, message => "invalid query parameters"));
            }
            Ok(params) => params,
        }
    }};
}

async fn track_stats(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let track_id = req.param("track_id")?;
    let period = params.period.as_deref().unwrap_or(stats::DEFAULT_PERIOD);
    match stats::track_stats(&req.state().engine, track_id, period).await {
        Ok(s) => Ok(resp!(json => s)),
        Err(e) => error_response(e),
    }
}

async fn track_sources(req: tide::Request<Context>) -> tide::Result {
    let track_id = req.param("track_id")?;
    match stats::track_sources(&req.state().engine, track_id).await {
        Ok(s) => Ok(resp!(json => s)),
        Err(e) => error_response(e),
    }
}

async fn reconcile_track(req: tide::Request<Context>) -> tide::Result {
    let track_id = req.param("track_id")?;
    match reconcile::reconcile_track(&req.state().engine, track_id).await {
        Ok(report) => Ok(resp!(json => report)),
        Err(e) => error_response(e.into()),
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackArtist {
    artist_id: String,
}

async fn register_track(mut req: tide::Request<Context>) -> tide::Result {
    let body: TrackArtist = match req.body_json().await {
        Ok(b) => b,
        Err(e) => {
            slog::info!(LOG, "invalid track artist body {}", e);
            return Ok(resp!(status => 400, message => format!("invalid track artist body: {}", e)));
        }
    };
    let track_id = req.param("track_id")?.to_string();
    match req
        .state()
        .engine
        .register_track(&track_id, &body.artist_id)
        .await
    {
        Ok(()) => Ok(resp!(json => serde_json::json!({
            "trackId": track_id.trim(),
            "artistId": body.artist_id.trim(),
        }))),
        Err(e) => error_response(e),
    }
}

async fn artist_overview(req: tide::Request<Context>) -> tide::Result {
    let artist_id = req.param("artist_id")?;
    match stats::artist_overview(&req.state().engine, artist_id).await {
        Ok(o) => Ok(resp!(json => o)),
        Err(e) => error_response(e),
    }
}

async fn top_tracks(req: tide::Request<Context>) -> tide::Result {
    let params = params_or_error!(req);
    let period = params.period.as_deref().unwrap_or(stats::DEFAULT_PERIOD);
    match stats::top_tracks(&req.state().engine, period, params.limit).await {
        Ok(t) => Ok(resp!(json => t)),
        Err(e) => error_response(e),
    }
}
