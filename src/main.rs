use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use lagoon_bot::command::CommandHandler;
use lagoon_bot::config::Config;
use lagoon_bot::irc::dispatch::spawn_event_processor;
use lagoon_bot::irc::liveness;
use lagoon_bot::irc::pool::Pool;
use lagoon_bot::irc::session::SessionConfig;
use lagoon_bot::irc::transport::Transport;
use lagoon_bot::store::ServerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("lagoon-bot {}", env!("CARGO_PKG_VERSION"));
    if config.dev {
        warn!("running in develop mode!");
    }
    info!(
        nick = %config.nick,
        owner = %config.owner,
        home = %config.home_server,
        tls = config.tls,
        "starting"
    );

    let store = Arc::new(ServerStore::load_or_create(&config.data_dir)?);
    store.pin_home(&config.home_server).await?;

    let transport = if config.tls {
        Transport::tls()?
    } else {
        Transport::Plain
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let pool = Arc::new(Pool::new(
        SessionConfig {
            nick: config.nick.clone(),
            transport,
            reconnect_delay: config.reconnect_delay,
        },
        config.owner.clone(),
        event_tx,
    ));

    let handler = Arc::new(CommandHandler::new(
        Arc::clone(&pool),
        Arc::clone(&store),
        &config,
    ));
    spawn_event_processor(Arc::clone(&pool), event_rx, handler);
    liveness::spawn(Arc::clone(&pool), config.probe_interval);

    let report = pool.sync(&store.all().await).await;
    info!(sessions = ?report.created, "initial sync done");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    pool.shutdown().await;
    Ok(())
}
