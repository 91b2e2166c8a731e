use std::sync::Arc;

use mm_core::{
    config::Config,
    poll::{JsonPollStore, PollStore},
};

#[tokio::main]
async fn main() -> Result<(), mm_core::Error> {
    let cfg = Arc::new(Config::load()?);
    mm_core::logging::init("mm", cfg.log_json)?;

    let store: Arc<dyn PollStore> = Arc::new(JsonPollStore::open(cfg.data_dir.clone()).await?);

    mm_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| mm_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
