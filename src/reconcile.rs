/*!
Rebuilds track aggregates from the event log.

Aggregates can drift when a counted play was logged but its increment
failed. The log is the source of truth, so reconciling just sets the
aggregate to the number of counted events. Running it again changes
nothing.

A pass that lands between a play's append and its increment counts
that play twice. The next pass corrects it.
*/
use crate::errors::StoreResult;
use crate::ingest::PlayEngine;
use crate::models::ReconcileReport;
use crate::store::bounded;
use crate::LOG;

pub async fn reconcile_track(engine: &PlayEngine, track_id: &str) -> StoreResult<ReconcileReport> {
    let timeout = engine.rules().store_timeout;
    let (before, after) = bounded(timeout, engine.store().reconcile_track_plays(track_id)).await?;
    let report = ReconcileReport {
        track_id: track_id.to_string(),
        before,
        after,
    };
    if report.drifted() {
        slog::warn!(
            LOG, "track aggregate drifted from event log";
            "track_id" => track_id,
            "before" => before,
            "after" => after,
        );
    }
    Ok(report)
}

/// Reconcile every known track. A failure on one track is logged
/// and doesn't stop the rest.
pub async fn reconcile_all(engine: &PlayEngine) -> StoreResult<Vec<ReconcileReport>> {
    let timeout = engine.rules().store_timeout;
    let track_ids = bounded(timeout, engine.store().known_track_ids()).await?;
    let mut reports = Vec::with_capacity(track_ids.len());
    for track_id in &track_ids {
        match reconcile_track(engine, track_id).await {
            Ok(report) => reports.push(report),
            Err(e) => slog::error!(
                LOG, "error reconciling track";
                "track_id" => track_id,
                "error" => %e,
            ),
        }
    }
    let drifted = reports.iter().filter(|r| r.drifted()).count();
    slog::info!(
        LOG, "reconciled track aggregates";
        "tracks" => reports.len(),
        "drifted" => drifted,
    );
    Ok(reports)
}

pub async fn background_reconcile(engine: std::sync::Arc<PlayEngine>, interval_seconds: u64) {
    if interval_seconds == 0 {
        slog::info!(LOG, "background reconcile disabled");
        return;
    }
    loop {
        async_std::task::sleep(std::time::Duration::from_secs(interval_seconds)).await;
        if let Err(e) = reconcile_all(&engine).await {
            slog::error!(LOG, "error while running background reconcile {:?}", e);
        }
    }
}
