use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{Gallery, Ledger, OnnxEmbedder};
use rollcall_engine::{
    spawn_engine, Config, EngineHandle, EngineStatus, PreviewFileSink, Session, SessionState,
    CONSOLE_DEFAULTS,
};
use rollcall_hw::Camera;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam face recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an attendance session until Ctrl-C
    ///
    /// Each newly marked identity is printed as it is recorded. The annotated
    /// camera view is a JPEG at --preview, rewritten on every frame.
    Watch(WatchArgs),
    /// Load the reference gallery and list the identities found
    Gallery {
        /// Directory of reference face images
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print the attendance file
    Attendance {
        /// Attendance CSV file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Overrides for `ROLLCALL_*` settings.
#[derive(Args)]
struct WatchArgs {
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
    /// Euclidean distance threshold for a match
    #[arg(long)]
    threshold: Option<f32>,
    /// Preview JPEG rewritten on every frame
    #[arg(long)]
    preview: Option<PathBuf>,
}

impl WatchArgs {
    fn apply(self, config: &mut Config) {
        if let Some(device) = self.device {
            config.camera_device = device;
        }
        if let Some(dir) = self.gallery {
            config.gallery_dir = dir;
        }
        if let Some(file) = self.attendance {
            config.attendance_file = file;
        }
        if let Some(n) = self.frame_skip {
            config.frame_skip = n.max(1);
        }
        if let Some(t) = self.threshold {
            config.match_threshold = t;
        }
        if let Some(path) = self.preview {
            config.preview_path = path;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env(CONSOLE_DEFAULTS);

    match cli.command {
        Commands::Watch(args) => {
            args.apply(&mut config);
            watch(config).await?;
        }
        Commands::Gallery { dir } => {
            if let Some(dir) = dir {
                config.gallery_dir = dir;
            }
            let mut embedder = OnnxEmbedder::load(&config.model_dir)?;
            let gallery = Gallery::load(&config.gallery_dir, &mut embedder)?;
            if gallery.is_empty() {
                println!("No faces found in {}", config.gallery_dir.display());
            }
            for identity in gallery.identities() {
                println!("{identity}");
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Attendance { file } => {
            if let Some(file) = file {
                config.attendance_file = file;
            }
            let ledger = Ledger::new(&config.attendance_file, config.dedup_policy);
            match ledger.contents()? {
                Some(text) => print!("{text}"),
                None => println!("No attendance file at {}", config.attendance_file.display()),
            }
        }
    }

    Ok(())
}

async fn watch(config: Config) -> Result<()> {
    let session = Session::from_config(&config)?;
    let ledger = Ledger::new(&config.attendance_file, config.dedup_policy);
    let sink = PreviewFileSink::new(&config.preview_path);
    let (engine, join) = spawn_engine(session, ledger, Box::new(sink))?;

    engine
        .start()
        .await
        .with_context(|| format!("failed to start session on {}", config.camera_device))?;
    println!(
        "Watching {} (preview: {}, attendance: {}). Press Ctrl-C to stop.",
        config.camera_device,
        config.preview_path.display(),
        config.attendance_file.display()
    );

    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        status = follow_session(&engine) => {
            if let Some(err) = status?.last_error {
                eprintln!("Session ended: {err}");
            }
        }
    }

    engine.stop().await?;
    let status = engine.status().await?;
    println!(
        "{} frames read, {} analysed. Present: {}",
        status.frames_read,
        status.frames_analysed,
        if status.marked.is_empty() { "none".to_string() } else { status.marked.join(", ") }
    );

    engine.shutdown().await?;
    tokio::task::spawn_blocking(move || join.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    Ok(())
}

/// Print identities as they are marked. Resolves once the session leaves
/// Running on its own (camera or ledger failure).
async fn follow_session(engine: &EngineHandle) -> Result<EngineStatus> {
    let mut shown = 0;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = engine.status().await?;
        for identity in unseen_marks(&status.marked, &mut shown) {
            println!("Present: {identity}");
        }
        if status.state == SessionState::Idle {
            return Ok(status);
        }
    }
}

/// Marks past the `shown` cursor; the marked list only ever grows at the end.
fn unseen_marks<'a>(marked: &'a [String], shown: &mut usize) -> &'a [String] {
    let start = (*shown).min(marked.len());
    *shown = marked.len();
    &marked[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_marks_returns_each_identity_once() {
        let mut shown = 0;
        let mut marked = vec!["ALICE".to_string()];
        assert_eq!(unseen_marks(&marked, &mut shown), ["ALICE"]);
        assert!(unseen_marks(&marked, &mut shown).is_empty());

        marked.push("BOB".into());
        marked.push("CAROL".into());
        assert_eq!(unseen_marks(&marked, &mut shown), ["BOB", "CAROL"]);
        assert_eq!(shown, 3);
    }

    #[test]
    fn test_watch_help_describes_preview_and_marks() {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        let help = cmd
            .find_subcommand_mut("watch")
            .map(|c| c.render_long_help().to_string())
            .unwrap_or_default();
        assert!(help.contains("newly marked identity is printed"));
        assert!(help.contains("--preview"));
    }
}
