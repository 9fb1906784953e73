use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{DedupKey, DedupKind, PlayStore};
use crate::errors::{StoreError, StoreResult};
use crate::models::{PlayEvent, PlaySource, TrackRollup, TrackTotals};
use crate::LOG;

/// Event store backed by the `playcount` postgres schema
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(
        db_url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply any pending migrations from `migrations/`
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("error running migrations {:?}", e)))?;
        slog::info!(LOG, "migrations applied");
        Ok(())
    }
}

fn dedup_column(kind: DedupKind) -> &'static str {
    match kind {
        DedupKind::User => "user_id",
        DedupKind::Session => "session_id",
        DedupKind::IpHash => "ip_hash",
    }
}

#[async_trait]
impl PlayStore for PgStore {
    async fn append(&self, event: &PlayEvent) -> StoreResult<()> {
        sqlx::query(
            "
            insert into playcount.play_events
            (id, track_id, user_id, session_id, listen_duration_seconds,
             completed_full, source, ip_hash, counted_as_play, played_at)
            values
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(event.id)
        .bind(&event.track_id)
        .bind(&event.user_id)
        .bind(&event.session_id)
        .bind(event.listen_duration_seconds as i32)
        .bind(event.completed_full)
        .bind(event.source.as_str())
        .bind(&event.ip_hash)
        .bind(event.counted_as_play)
        .bind(event.played_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counted_play_exists(
        &self,
        track_id: &str,
        key: DedupKey<'_>,
        since: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // one statement per key so each one can use its own
        // (key, track_id, played_at) index
        let sql = format!(
            "
            select exists(
                select 1 from playcount.play_events
                where track_id = $1
                    and {} = $2
                    and counted_as_play
                    and played_at >= $3
                    and played_at < $4
            )
            ",
            dedup_column(key.kind())
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(track_id)
            .bind(key.value())
            .bind(since)
            .bind(before)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn increment_track_plays(&self, track_id: &str) -> StoreResult<()> {
        sqlx::query(
            "
            insert into playcount.tracks (id, plays)
            values ($1, 1)
            on conflict (id) do update set
                plays = playcount.tracks.plays + 1,
                modified = now()
            ",
        )
        .bind(track_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn track_plays(&self, track_id: &str) -> StoreResult<i64> {
        let plays: Option<i64> =
            sqlx::query_scalar("select plays from playcount.tracks where id = $1")
                .bind(track_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(plays.unwrap_or(0))
    }

    async fn reconcile_track_plays(&self, track_id: &str) -> StoreResult<(i64, i64)> {
        let mut tr = self.pool.begin().await?;
        sqlx::query("insert into playcount.tracks (id) values ($1) on conflict (id) do nothing")
            .bind(track_id)
            .execute(&mut tr)
            .await?;
        // row lock holds concurrent increments off until we've written
        let before: i64 =
            sqlx::query_scalar("select plays from playcount.tracks where id = $1 for update")
                .bind(track_id)
                .fetch_one(&mut tr)
                .await?;
        let after: i64 = sqlx::query_scalar(
            "
            update playcount.tracks set
                plays = (
                    select count(*) from playcount.play_events
                    where track_id = $1 and counted_as_play
                ),
                modified = now()
            where id = $1
            returning plays
            ",
        )
        .bind(track_id)
        .fetch_one(&mut tr)
        .await?;
        tr.commit().await?;
        Ok((before, after))
    }

    async fn known_track_ids(&self) -> StoreResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "
            select id from playcount.tracks
            union
            select track_id from playcount.play_events
            order by 1
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn register_track(&self, track_id: &str, artist_id: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            "
            insert into playcount.tracks (id, artist_id)
            values ($1, $2)
            on conflict (id) do update set
                artist_id = excluded.artist_id,
                modified = now()
            ",
        )
        .bind(track_id)
        .bind(artist_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn track_totals(&self, track_id: &str, since: DateTime<Utc>) -> StoreResult<TrackTotals> {
        let totals = sqlx::query_as::<_, TrackTotals>(
            "
            select
                count(*) as total_events,
                count(*) filter (where counted_as_play) as counted_plays,
                count(*) filter (where counted_as_play and completed_full) as completed_plays,
                coalesce(sum(listen_duration_seconds), 0)::bigint as total_listen_seconds,
                count(distinct coalesce(user_id, session_id))
                    filter (where counted_as_play) as unique_listeners
            from playcount.play_events
            where track_id = $1
                and played_at >= $2
            ",
        )
        .bind(track_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }

    async fn source_counts(&self, track_id: &str) -> StoreResult<Vec<(PlaySource, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "
            select source, count(*)
            from playcount.play_events
            where track_id = $1 and counted_as_play
            group by source
            ",
        )
        .bind(track_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(source, count)| {
                source
                    .parse::<PlaySource>()
                    .map(|s| (s, count))
                    .map_err(StoreError::Decode)
            })
            .collect()
    }

    async fn top_tracks(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<TrackRollup>> {
        let top = sqlx::query_as::<_, TrackRollup>(
            "
            select
                track_id,
                count(*) as plays,
                count(*) filter (where completed_full) as completed_plays
            from playcount.play_events
            where counted_as_play
                and played_at >= $1
            group by track_id
            order by plays desc, track_id
            limit $2
            ",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(top)
    }

    async fn artist_rollups(&self, artist_id: &str) -> StoreResult<Vec<TrackRollup>> {
        let rollups = sqlx::query_as::<_, TrackRollup>(
            "
            select
                p.track_id,
                count(*) as plays,
                count(*) filter (where p.completed_full) as completed_plays
            from playcount.play_events p
                inner join playcount.tracks t
                on t.id = p.track_id
            where t.artist_id = $1
                and p.counted_as_play
            group by p.track_id
            order by plays desc, p.track_id
            ",
        )
        .bind(artist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rollups)
    }

    async fn artist_unique_listeners(&self, artist_id: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "
            select count(distinct coalesce(p.user_id, p.session_id))
            from playcount.play_events p
                inner join playcount.tracks t
                on t.id = p.track_id
            where t.artist_id = $1
                and p.counted_as_play
            ",
        )
        .bind(artist_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
