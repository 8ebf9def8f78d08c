use std::sync::Arc;

use cabbie::api::DynAPI;
use cabbie::config::Config;
use cabbie::db::{MemoryStore, PgStore, Store};
use cabbie::engine::{sweeper, Engine};
use cabbie::error::Error;
use cabbie::external::notifier::{LogNotifier, Notifier, WebhookNotifier};
use cabbie::server;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgStore::new(url, config.max_connections).await?),
        None => {
            tracing::warn!("CABBIE_DATABASE_URL not set, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.clone() {
        Some(url) => Arc::new(WebhookNotifier::new(url, config.notify_timeout())?),
        None => Arc::new(LogNotifier),
    };

    let engine = Engine::new(store, notifier, config.engine_settings()).await?;

    sweeper::spawn(engine.clone(), config.sweep_interval());

    server::serve(Arc::new(engine) as DynAPI, config.bind_addr).await
}
