use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use log::{error, info};
use tokio::{net::TcpListener, select, sync::broadcast};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::{Args, Config},
    consts::WS_CHANNEL_CAPACITY,
    core::{stats, stats::Stats, Relay},
    error::RelayError,
    subscription::pubsub_pool,
};

mod config;
mod consts;
mod core;
mod error;
mod pool;
mod subscription;
mod websocket;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), RelayError> {
    let config = Config::try_from(args)?;
    let pool = pubsub_pool(&config)?;

    info!(
        "Connecting to {} (max idle {}, max active {})",
        config.redis_url(),
        pool.config().max_idle,
        pool.config().max_active
    );

    let stats = Arc::new(Stats::default());
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    if let Some(period) = config.stats_interval {
        let stats = stats.clone();
        let token = token.clone();
        tracker.spawn(async move { stats::report(&stats, period, token).await });
    }

    let mut relay = Relay::new(pool, config.channels, config.reconnect, stats.clone());

    if let Some(addr) = config.ws_addr {
        let listener = TcpListener::bind(addr).await?;
        info!("websocket server started at {}", listener.local_addr()?);

        let (tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);
        relay = relay.with_broadcast(tx.clone());

        let token = token.clone();
        let peers = tracker.clone();
        tracker.spawn(websocket::serve(listener, tx, token, peers));
    }

    let result = select! {
        result = relay.run(token.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Exiting");
            Ok(())
        }
    };

    token.cancel();
    tracker.close();
    tracker.wait().await;

    info!("stats: {}", stats.snapshot());

    result
}
