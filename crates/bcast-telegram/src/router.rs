use std::sync::Arc;

use teloxide::{
    dispatching::{DefaultKey, Dispatcher},
    dptree,
    prelude::*,
    RequestError,
};
use tracing::{info, warn};

use bcast_core::{
    broadcast::{BroadcastEngine, BroadcastService, BroadcastSupervisor},
    config::Config,
    store::JsonStore,
};

use crate::handlers;
use crate::TelegramDelivery;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<JsonStore>,
    pub broadcasts: BroadcastService,
}

impl AppState {
    pub fn account(&self) -> Option<&str> {
        self.cfg.account_key.as_deref()
    }
}

/// Operator message dispatcher. Ctrl-c stops polling so running broadcasts can drain.
fn dispatcher(bot: Bot, state: Arc<AppState>) -> Dispatcher<Bot, RequestError, DefaultKey> {
    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<JsonStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!("bcast started: @{}", me.username());
    }
    info!("Data file: {}", store.path().display());
    info!("Operators: {}", cfg.telegram_allowed_users.len());
    match cfg.account_key.as_deref() {
        Some(key) => info!("Recipient account: {key}"),
        None => info!("Recipient account: all"),
    }

    let delivery = Arc::new(TelegramDelivery::new(bot.clone()));
    let engine = Arc::new(BroadcastEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        delivery,
        cfg.broadcast_settings(),
    ));
    let supervisor = BroadcastSupervisor::spawn(engine);
    let broadcasts = BroadcastService::new(store.clone(), supervisor, cfg.account_key.clone());

    let state = Arc::new(AppState {
        cfg,
        store,
        broadcasts: broadcasts.clone(),
    });

    dispatcher(bot, state).dispatch().await;

    warn!("Polling stopped, waiting for running broadcasts");
    broadcasts.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn dispatcher_builds_with_ctrlc_shutdown() {
        let path = std::env::temp_dir().join(format!("bcast-router-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let store = Arc::new(JsonStore::open(&path).await.unwrap());
        let cfg = Arc::new(Config {
            telegram_bot_token: "123:test".to_string(),
            telegram_allowed_users: vec![1],
            data_file: path.clone(),
            account_key: None,
            batch_size: 25,
            batch_delay: Duration::from_secs(1),
            history_limit: 20,
        });

        let bot = Bot::new(cfg.telegram_bot_token.clone());
        let engine = Arc::new(BroadcastEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(TelegramDelivery::new(bot.clone())),
            cfg.broadcast_settings(),
        ));
        let broadcasts =
            BroadcastService::new(store.clone(), BroadcastSupervisor::spawn(engine), None);
        let state = Arc::new(AppState {
            cfg,
            store,
            broadcasts: broadcasts.clone(),
        });

        let _dispatcher = dispatcher(bot, state);
        broadcasts.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }
}
