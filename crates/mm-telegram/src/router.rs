use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use mm_core::{
    config::Config,
    messaging::port::MessagingPort,
    poll::{PollService, PollStore},
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub polls: PollService,
    pub messenger: Arc<dyn MessagingPort>,
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<dyn PollStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "could not fetch bot identity"),
    }
    tracing::info!(data_dir = %cfg.data_dir.display(), "poll data directory");

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let polls = PollService::new(store, messenger.clone(), cfg.polls);

    let state = Arc::new(AppState {
        polls: polls.clone(),
        messenger,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // Dispatch returns on Ctrl-C; flush votes still queued for storage.
    tracing::info!("shutting down");
    polls.shutdown().await;
    Ok(())
}
