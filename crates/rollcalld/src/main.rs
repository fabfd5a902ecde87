use anyhow::Result;
use clap::Parser;
use rollcall_core::Ledger;
use rollcall_engine::{spawn_engine, Config, Session, SnapshotSink, DASHBOARD_DEFAULTS};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod error;
mod http;

/// Browser dashboard for a webcam attendance session.
#[derive(Parser, Debug)]
#[command(name = "rollcalld")]
struct Opts {
    /// Listen address
    #[arg(long)]
    addr: Option<String>,
    /// V4L2 device path
    #[arg(long)]
    device: Option<String>,
    /// Directory of reference face images
    #[arg(long)]
    gallery: Option<PathBuf>,
    /// Attendance CSV file
    #[arg(long)]
    attendance: Option<PathBuf>,
    /// Analyse every Nth frame
    #[arg(long)]
    frame_skip: Option<u32>,
    /// Start the session immediately instead of waiting for the dashboard
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let mut config = Config::from_env(DASHBOARD_DEFAULTS);
    if let Some(addr) = opts.addr {
        config.listen_addr = addr;
    }
    if let Some(device) = opts.device {
        config.camera_device = device;
    }
    if let Some(dir) = opts.gallery {
        config.gallery_dir = dir;
    }
    if let Some(file) = opts.attendance {
        config.attendance_file = file;
    }
    if let Some(n) = opts.frame_skip {
        config.frame_skip = n.max(1);
    }

    tracing::info!(
        device = %config.camera_device,
        gallery = %config.gallery_dir.display(),
        attendance = %config.attendance_file.display(),
        frame_skip = config.frame_skip,
        dedup = ?config.dedup_policy,
        "rollcalld starting"
    );

    let session = Session::from_config(&config)?;
    let ledger = Ledger::new(&config.attendance_file, config.dedup_policy);
    let (sink, snapshot) = SnapshotSink::new();
    let (engine, join) = spawn_engine(session, ledger, Box::new(sink))?;

    if opts.autostart {
        if let Err(e) = engine.start().await {
            tracing::warn!(error = %e, "autostart failed; start the session from the dashboard");
        }
    }

    let state = Arc::new(http::AppState {
        engine: engine.clone(),
        snapshot,
        attendance_file: config.attendance_file.clone(),
    });
    let app = http::create_app(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "rollcalld ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    tracing::info!("rollcalld shutting down");
    engine.stop().await?;
    engine.shutdown().await?;
    tokio::task::spawn_blocking(move || join.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;

    Ok(())
}
