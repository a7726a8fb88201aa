use std::sync::Arc;

use bcast_core::{config::Config, store::JsonStore};

#[tokio::main]
async fn main() -> Result<(), bcast_core::Error> {
    bcast_core::logging::init("bcast")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(JsonStore::open(&cfg.data_file).await?);

    bcast_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| bcast_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
