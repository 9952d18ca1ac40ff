use std::sync::Arc;

use tokio::select;
use tokio::signal::unix;
use tokio::signal::unix::SignalKind;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cli::arguments;
use crate::config::RelayNodeConfig;
use crate::node::Node;
use crate::tui::{run_operator_input, run_stats_loop, LogQueueLayer};

pub async fn run(args: arguments::Run) -> eyre::Result<()> {
    let config = RelayNodeConfig::from_path(args.config)?;
    let level_filter = config.logger.level;

    let filter = Targets::new()
        .with_target("relay_types", level_filter)
        .with_target("relay_net", level_filter)
        .with_target("relay_pool", level_filter)
        .with_target("relay_trusted", level_filter)
        .with_target("relay_sidechannel", level_filter)
        .with_target("relay_controller", level_filter)
        .with_target("relaylog", level_filter)
        .with_target("relaynoded", level_filter)
        .with_default(level_filter);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let node = Arc::new(Node::new(config).await?);
    let log_queue_layer = LogQueueLayer::new(node.event_bus());

    tracing_subscriber::registry()
        .with(log_queue_layer.with_filter(filter))
        .with(env_filter)
        .try_init()?;

    node.run().await?;

    let log_lines = node.log_queue();
    tokio::spawn(run_operator_input(node.clone()));
    tokio::spawn(run_stats_loop(node.clone(), log_lines));

    let mut sigterm =
        unix::signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint =
        unix::signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    select! {
        _ = node.cancelled() => {
            tracing::info!("node cancelled");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT");
        }
    }

    node.shutdown().await;

    Ok(())
}
