use crate::session::{Session, SessionError, SessionState};
use crate::sink::FrameSink;
use rollcall_core::{Embedder, Ledger};
use rollcall_hw::CameraOpener;
use serde::Serialize;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
}

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: SessionState,
    pub frames_read: u64,
    pub frames_analysed: u64,
    /// Identities confirmed present this run, in first-seen order.
    pub marked: Vec<String>,
    /// Most recent start or step failure, cleared by a successful start.
    pub last_error: Option<String>,
    /// Identities in the loaded gallery.
    pub gallery: Vec<String>,
}

/// Messages sent from front ends to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Idle → Running: open the camera and begin the capture loop.
    pub async fn start(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Start { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Running → Idle. Returns whether a run was in progress.
    pub async fn stop(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Stop { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Stop any run and end the engine thread.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Shutdown).await
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the capture session on a dedicated OS thread.
///
/// While Idle the thread blocks on the request channel; while Running it
/// drains pending requests between frames and otherwise keeps stepping the
/// session. The thread exits on `Shutdown` or when every handle is dropped.
pub fn spawn_engine<O, E>(
    session: Session<O, E>,
    ledger: Ledger,
    sink: Box<dyn FrameSink>,
) -> Result<(EngineHandle, JoinHandle<()>), EngineError>
where
    O: CameraOpener + Send + 'static,
    O::Source: Send + 'static,
    E: Embedder + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);

    let join = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || run(session, ledger, sink, rx))
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, join))
}

fn run<O: CameraOpener, E: Embedder>(
    mut session: Session<O, E>,
    mut ledger: Ledger,
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<EngineRequest>,
) {
    tracing::info!(
        gallery = session.gallery().len(),
        attendance = %ledger.path().display(),
        "engine thread started"
    );
    let mut last_error: Option<String> = None;

    loop {
        let req = match session.state() {
            SessionState::Idle => match rx.blocking_recv() {
                Some(req) => Some(req),
                None => break,
            },
            SessionState::Running => match rx.try_recv() {
                Ok(req) => Some(req),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            },
        };

        if let Some(req) = req {
            match req {
                EngineRequest::Start { reply } => {
                    let result = session.start().map_err(EngineError::from);
                    last_error = result.as_ref().err().map(ToString::to_string);
                    let _ = reply.send(result);
                }
                EngineRequest::Stop { reply } => {
                    let _ = reply.send(session.stop());
                }
                EngineRequest::Status { reply } => {
                    let _ = reply.send(EngineStatus {
                        state: session.state(),
                        frames_read: session.frames_read(),
                        frames_analysed: session.frames_analysed(),
                        marked: ledger.marked().to_vec(),
                        last_error: last_error.clone(),
                        gallery: session.gallery().identities().into_iter().map(String::from).collect(),
                    });
                }
                EngineRequest::Shutdown => break,
            }
            continue;
        }

        match session.step(&mut ledger, sink.as_mut()) {
            Ok(report) => {
                for identity in &report.newly_marked {
                    tracing::info!(identity = %identity, sequence = report.sequence, "marked present");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "session ended");
                last_error = Some(e.to_string());
            }
        }
    }

    session.stop();
    tracing::info!("engine thread exiting");
}
