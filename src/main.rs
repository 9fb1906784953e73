use std::sync::Arc;

use playcount::clock::SystemClock;
use playcount::crypto::IpHasher;
use playcount::ingest::{PlayEngine, PlayRules};
use playcount::store::{MemoryStore, PgStore, PlayStore};
use playcount::{reconcile, service, StoreKind, CONFIG, LOG};

async fn connect_store() -> anyhow::Result<Arc<dyn PlayStore>> {
    match CONFIG.store {
        StoreKind::Memory => {
            slog::warn!(LOG, "using in-memory store, plays will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let store = PgStore::connect(
                &CONFIG.db_url,
                CONFIG.db_max_connections,
                std::time::Duration::from_millis(CONFIG.store_timeout_ms),
            )
            .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    CONFIG.initialize()?;

    let store = connect_store().await?;
    let engine = Arc::new(PlayEngine::new(
        store,
        PlayRules::from_config(&CONFIG),
        IpHasher::new(CONFIG.ip_hash_key.as_bytes()),
        Arc::new(SystemClock),
    ));
    async_std::task::spawn(reconcile::background_reconcile(
        engine.clone(),
        CONFIG.reconcile_interval_seconds,
    ));
    service::start(engine).await?;
    Ok(())
}
