pub mod accumulator;
pub mod hot_swap;
pub mod state;

use std::sync::Arc;

use font_registry::FontRegistry;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub use accumulator::{EpochAccumulator, EpochPhase, Transition};
pub use hot_swap::{FontHotSwapper, LoadError, ReloadOutcome, ReloadTicket};
pub use state::{ConnectionStatus, FontStatus, SessionState, SessionView};

use crate::api::{ApiError, BackendClient, FontSource};
use crate::config::Config;
use crate::transport::{self, ChannelError, ConnectionChannel, Frame};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Totals for one session run, mostly for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub frames: u64,
    pub epochs_published: u64,
    pub reloads: Vec<ReloadOutcome>,
}

/// One live connection to the backend: frames flow from the channel through
/// the accumulator into the shared state, and every published epoch starts a
/// font reload.
pub struct Session {
    channel: ConnectionChannel,
    accumulator: EpochAccumulator,
    state: Arc<SessionState>,
    swapper: Arc<FontHotSwapper>,
    reloads: JoinSet<ReloadOutcome>,
}

impl Session {
    /// `swapper` must have been built over the same `state`.
    pub fn new(
        channel: ConnectionChannel,
        state: Arc<SessionState>,
        swapper: Arc<FontHotSwapper>,
    ) -> Self {
        if channel.is_connected() {
            state.set_connection(ConnectionStatus::Established);
        }
        Self {
            channel,
            accumulator: EpochAccumulator::with_swapper(state.clone(), swapper.clone()),
            state,
            swapper,
            reloads: JoinSet::new(),
        }
    }

    /// Connects the push channel derived from `config.server_url` and wires a
    /// hot-swapper that fetches from the same backend.
    pub async fn connect(
        config: &Config,
        state: Arc<SessionState>,
        registry: Arc<dyn FontRegistry>,
    ) -> Result<Self, SessionError> {
        let client = BackendClient::new(&config.server_url, config.http_timeout)?;
        let source: Arc<dyn FontSource> = Arc::new(client);
        let swapper = Arc::new(FontHotSwapper::new(
            source,
            registry,
            state.clone(),
            config.family_prefix.clone(),
        ));
        Self::connect_with(config, state, swapper).await
    }

    pub async fn connect_with(
        config: &Config,
        state: Arc<SessionState>,
        swapper: Arc<FontHotSwapper>,
    ) -> Result<Self, SessionError> {
        let url = transport::derive_websocket_url(&config.server_url)?;
        let channel = match ConnectionChannel::connect(&url).await {
            Ok(channel) => channel,
            Err(err) => {
                state.set_connection(ConnectionStatus::Closed);
                return Err(err.into());
            }
        };
        info!(target = "preview.session", url = %url, "session connected");
        Ok(Self::new(channel, state, swapper))
    }

    pub fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }

    pub fn swapper(&self) -> Arc<FontHotSwapper> {
        self.swapper.clone()
    }

    pub fn phase(&self) -> EpochPhase {
        self.accumulator.phase()
    }

    /// Handles one frame. Each call runs to completion before the next frame
    /// is looked at. A published epoch has already begun its reload when this
    /// returns; only the fetch is left to a background task.
    pub fn handle_frame(&mut self, frame: Frame) -> Transition {
        let transition = self.accumulator.handle_frame(frame);
        if let Some(ticket) = transition.reload_ticket() {
            let swapper = self.swapper.clone();
            self.reloads.spawn(async move { swapper.finish(ticket).await });
        }
        transition
    }

    /// Processes frames until the channel closes, then waits for reloads still
    /// in flight. A partial epoch at close is discarded.
    pub async fn run(mut self) -> SessionReport {
        let mut report = SessionReport::default();
        loop {
            tokio::select! {
                frame = self.channel.recv() => {
                    let Some(frame) = frame else { break };
                    report.frames += 1;
                    if self.handle_frame(frame).published().is_some() {
                        report.epochs_published += 1;
                    }
                }
                Some(joined) = self.reloads.join_next(), if !self.reloads.is_empty() => {
                    record_reload(&mut report, joined);
                }
            }
        }

        if self.accumulator.reset() {
            debug!(target = "preview.session", "discarded unfinished epoch on close");
        }
        self.state.set_connection(ConnectionStatus::Closed);
        info!(
            target = "preview.session",
            frames = report.frames,
            epochs = report.epochs_published,
            "push channel closed"
        );

        while let Some(joined) = self.reloads.join_next().await {
            record_reload(&mut report, joined);
        }
        report
    }
}

fn record_reload(
    report: &mut SessionReport,
    joined: Result<ReloadOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(outcome) => report.reloads.push(outcome),
        Err(err) => warn!(target = "preview.session", error = %err, "font reload task failed"),
    }
}

/// The process-wide session: created on first access, torn down explicitly.
pub struct SessionHandle {
    state: Arc<SessionState>,
    swapper: Arc<FontHotSwapper>,
    task: JoinHandle<Option<SessionReport>>,
}

impl SessionHandle {
    pub fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

static ACTIVE_SESSION: Lazy<Mutex<Option<SessionHandle>>> = Lazy::new(|| Mutex::new(None));

/// Returns the state of the running session, starting one if none exists.
/// Must be called from within a tokio runtime.
pub fn acquire_session(
    config: &Config,
    registry: Arc<dyn FontRegistry>,
) -> Result<Arc<SessionState>, SessionError> {
    let mut guard = ACTIVE_SESSION.lock();
    if let Some(handle) = guard.as_ref() {
        return Ok(handle.state());
    }

    let state = Arc::new(SessionState::new());
    let client = BackendClient::new(&config.server_url, config.http_timeout)?;
    let swapper = Arc::new(FontHotSwapper::new(
        Arc::new(client),
        registry,
        state.clone(),
        config.family_prefix.clone(),
    ));
    let task = tokio::spawn({
        let config = config.clone();
        let state = state.clone();
        let swapper = swapper.clone();
        async move {
            match Session::connect_with(&config, state.clone(), swapper).await {
                Ok(session) => Some(session.run().await),
                Err(err) => {
                    warn!(target = "preview.session", error = %err, "error starting session");
                    state.fail_epoch(format!("error starting session: {err}"));
                    None
                }
            }
        }
    });
    *guard = Some(SessionHandle {
        state: state.clone(),
        swapper,
        task,
    });
    Ok(state)
}

pub fn session_started() -> bool {
    ACTIVE_SESSION.lock().is_some()
}

/// Whether the process-wide session has stopped running (channel closed or
/// never connected). `false` when no session exists.
pub fn session_finished() -> bool {
    ACTIVE_SESSION
        .lock()
        .as_ref()
        .is_some_and(SessionHandle::is_finished)
}

/// Stops the process-wide session and deregisters its font. Returns whether
/// there was one.
pub fn release_session() -> bool {
    let Some(handle) = ACTIVE_SESSION.lock().take() else {
        return false;
    };
    handle.task.abort();
    handle.swapper.retire();
    handle.state.set_connection(ConnectionStatus::Closed);
    debug!(target = "preview.session", "session released");
    true
}
