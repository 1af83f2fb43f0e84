use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use skywatch::config::SkywatchConfig;
use skywatch::dashboard::{create_standalone_router, start_dashboard_server};
use skywatch::dispatcher::FrameDispatcher;
use skywatch::frame_source::build_frame_source;
use skywatch::radar::{detection_list, map_detections, ArcPolicy};
use skywatch::relay::{start_relay_server, Analyzer, Relay, RelayClient};
use skywatch::session::SessionHandle;

#[derive(Parser)]
#[command(name = "skywatch")]
#[command(about = "Pilot spotter: vision-language threat reports on a forward radar")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "skywatch.toml", global = true)]
    config: String,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the analysis relay
    Relay {
        /// Listen address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Dispatch frames to a remote relay and serve the dashboard
    Dashboard {
        /// Relay endpoint, overrides the config file
        #[arg(long)]
        relay_url: Option<String>,

        /// Dashboard listen address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Relay, dispatcher and dashboard in one process
    Standalone {
        /// Dashboard listen address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Map a JSON array of detections (file or stdin) to radar dots
    Map {
        /// Input file; stdin when omitted
        input: Option<PathBuf>,

        /// Drop detections outside the forward arc instead of clamping them
        #[arg(long)]
        drop_out_of_arc: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("skywatch={}", log_level))
        .try_init(); // Use try_init to avoid panic if already initialized

    let mut config = SkywatchConfig::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config))?;
    info!("Configuration loaded from {}", args.config);

    match args.command {
        Command::Relay { bind } => {
            let bind = bind.unwrap_or_else(|| config.relay.bind.clone());
            let relay = Relay::from_config(&config)?;
            start_relay_server(relay, &bind).await?;
        }
        Command::Dashboard { relay_url, bind } => {
            if let Some(url) = relay_url {
                config.dispatcher.relay_url = url;
            }
            if let Some(bind) = bind {
                config.dashboard.bind = bind;
            }
            let analyzer = Arc::new(RelayClient::new(
                config.dispatcher.relay_url.clone(),
                Duration::from_secs(config.dispatcher.timeout_seconds),
            )?);
            info!("Sending frames to relay at {}", config.dispatcher.relay_url);
            run_dashboard_mode(&config, analyzer, None).await?;
        }
        Command::Standalone { bind } => {
            if let Some(bind) = bind {
                config.dashboard.bind = bind;
            }
            let relay = Arc::new(Relay::from_config(&config)?);
            run_dashboard_mode(&config, relay.clone(), Some(relay)).await?;
        }
        Command::Map {
            input,
            drop_out_of_arc,
        } => {
            if drop_out_of_arc {
                config.radar.arc_policy = ArcPolicy::Drop;
            }
            run_map(&config, input).await?;
        }
    }

    Ok(())
}

/// Runs the dispatcher against `analyzer` and serves the dashboard until
/// Ctrl-C. When `relay` is given it is also exposed under `/relay`.
async fn run_dashboard_mode(
    config: &SkywatchConfig,
    analyzer: Arc<dyn Analyzer>,
    relay: Option<Arc<Relay>>,
) -> Result<()> {
    let session = SessionHandle::new();

    let source = build_frame_source(
        &config.dispatcher.source,
        Duration::from_secs(config.dispatcher.timeout_seconds),
    )?;
    let mut dispatcher = FrameDispatcher::from_config(source, analyzer, &config.dispatcher);
    dispatcher.attach_session(&session);

    let dispatch = tokio::spawn(dispatcher.run(shutdown_signal()));

    let server = async {
        match relay {
            Some(relay) => {
                let app = create_standalone_router(session.clone(), relay, &config.dashboard);
                info!("Starting dashboard on http://{} (relay at /relay)", config.dashboard.bind);
                let listener = tokio::net::TcpListener::bind(&config.dashboard.bind).await?;
                axum::serve(listener, app).await?;
                Ok::<(), anyhow::Error>(())
            }
            None => start_dashboard_server(session.clone(), &config.dashboard).await,
        }
    };

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!("Dashboard server error: {}", e);
                return Err(e);
            }
        }
        _ = shutdown_signal() => info!("Shutdown requested"),
    }

    let stats = dispatch.await?;
    info!(
        "Session ended with {} message(s); dispatcher {} completed / {} failed",
        session.messages().len(),
        stats.completed,
        stats.failed
    );
    Ok(())
}

async fn run_map(config: &SkywatchConfig, input: Option<PathBuf>) -> Result<()> {
    let content = match input {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };

    let value: serde_json::Value = serde_json::from_str(&content).context("input is not JSON")?;
    let raw = detection_list(&value).context("expected an array of detections")?;

    let dots = map_detections(&raw, &config.radar);
    println!("{}", serde_json::to_string_pretty(&dots)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
