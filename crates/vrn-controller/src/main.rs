//! Virtual router controller daemon.
//!
//! Loads the configuration, builds the controller for one datapath and runs
//! the serialized event loop until SIGINT.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use vrn_controller::daemon::{event_channel, ChannelResolver, ControllerEvent, EventLoop};
use vrn_controller::{
    Collaborators, ControllerConfig, DiscardDhcp, EmptyTopology, PortSetMap, VrnController,
};
use vrn_datapath::LoggingDatapath;

/// Virtual router forwarding controller
#[derive(Parser, Debug)]
#[command(name = "vrnd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "/etc/vrn/vrnd.toml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Override the managed datapath id
    #[arg(long)]
    datapath_id: Option<u64>,
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        error!(error = %e, "vrnd exiting with error");
        return Err(e);
    }
    info!("vrnd exiting normally");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ControllerConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(datapath_id) = args.datapath_id {
        config.controller.datapath_id = datapath_id;
    }
    config.validate().context("invalid configuration")?;

    info!(
        datapath_id = config.controller.datapath_id,
        local_address = %config.controller.local_address,
        idle_expire_secs = config.flows.idle_expire_secs,
        wildcard_flows = config.flows.wildcard_flows,
        static_neighbors = config.resolution.static_neighbors.len(),
        "starting vrnd"
    );

    let (events, receiver) = event_channel(&config.daemon);
    let controller = VrnController::new(
        &config,
        Collaborators {
            datapath: Box::new(LoggingDatapath::new(config.controller.datapath_id)),
            simulation: Box::new(EmptyTopology::new()),
            resolver: Box::new(ChannelResolver::new(events.clone(), &config.resolution)),
            dhcp: Box::new(DiscardDhcp),
            portsets: Box::new(PortSetMap::new()),
        },
    );

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            if events.send(ControllerEvent::Shutdown).await.is_err() {
                error!("event loop already stopped");
            }
        }
    });

    let controller = EventLoop::new(controller, receiver).run().await?;
    info!(stats = ?controller.stats(), "controller stopped");
    Ok(())
}
