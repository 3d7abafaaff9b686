//! Keeps the registered font in step with the latest published snapshot.
//!
//! Every reload takes a fresh version and load token in
//! [`FontHotSwapper::begin_reload`], synchronously, before its only suspension
//! point (fetching the binary in [`FontHotSwapper::finish`]). After resuming, a
//! result is applied only if both still match; otherwise a newer reload has
//! started and this one is dropped on the floor. Nothing aborts the in-flight
//! request, the result is simply discarded.
//!
//! Swap order is register new, mark active, then deregister old, so some
//! face is always registered once the first load succeeded.

use std::sync::Arc;

use bytes::Bytes;
use font_registry::{FontFace, FontRegistry, RegistryError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::{FontStatus, SessionState};
use crate::api::{ApiError, FontRequest, FontSource};
use crate::model::FontSnapshot;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("font fetch failed: {0}")]
    Fetch(#[from] ApiError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The new face is registered and active.
    Swapped { version: u64, family: String },
    /// A newer reload started while this one was in flight.
    Stale { version: u64 },
    /// Load failed; the previous face, if any, stays active.
    Failed { version: u64, kept_previous: bool },
}

/// Claim on one reload, taken synchronously by
/// [`FontHotSwapper::begin_reload`] and redeemed by [`FontHotSwapper::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadTicket {
    version: u64,
    token: u64,
    had_active: bool,
}

impl ReloadTicket {
    pub fn version(&self) -> u64 {
        self.version
    }
}

struct ActiveFont {
    family: String,
    // Sole strong reference; the registry only holds a weak one.
    _face: Arc<FontFace>,
}

#[derive(Default)]
struct FontLoadState {
    active: Option<ActiveFont>,
    current_version: u64,
    current_load_token: u64,
    loaded: bool,
    loading: bool,
}

impl FontLoadState {
    fn status(&self) -> FontStatus {
        FontStatus {
            family: self.active.as_ref().map(|active| active.family.clone()),
            loaded: self.loaded,
            loading: self.loading,
        }
    }

    fn is_current(&self, version: u64, token: u64) -> bool {
        self.current_version == version && self.current_load_token == token
    }
}

pub struct FontHotSwapper {
    source: Arc<dyn FontSource>,
    registry: Arc<dyn FontRegistry>,
    session: Arc<SessionState>,
    family_prefix: String,
    state: Mutex<FontLoadState>,
}

impl FontHotSwapper {
    pub fn new(
        source: Arc<dyn FontSource>,
        registry: Arc<dyn FontRegistry>,
        session: Arc<SessionState>,
        family_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source,
            registry,
            session,
            family_prefix: family_prefix.into(),
            state: Mutex::new(FontLoadState::default()),
        }
    }

    pub fn family_name(&self, version: u64) -> String {
        format!("{}-{}", self.family_prefix, version)
    }

    pub fn current_version(&self) -> u64 {
        self.state.lock().current_version
    }

    pub fn active_family(&self) -> Option<String> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|active| active.family.clone())
    }

    /// Starts and completes one reload.
    pub async fn reload(&self) -> ReloadOutcome {
        let ticket = self.begin_reload();
        self.finish(ticket).await
    }

    /// Claims the next version and marks the font as loading. Nothing is
    /// awaited, so reloads are ordered by when this was called.
    pub fn begin_reload(&self) -> ReloadTicket {
        self.begin(None)
    }

    /// Like [`FontHotSwapper::begin_reload`], and publishes `snapshot` in the
    /// same session update, so no observer sees the new snapshot without the
    /// load it started.
    pub(crate) fn begin_reload_for(&self, snapshot: Arc<FontSnapshot>) -> ReloadTicket {
        self.begin(Some(snapshot))
    }

    fn begin(&self, snapshot: Option<Arc<FontSnapshot>>) -> ReloadTicket {
        let mut state = self.state.lock();
        state.current_version += 1;
        state.current_load_token += 1;
        let had_active = state.active.is_some();
        if !had_active {
            state.loaded = false;
        }
        state.loading = true;
        match snapshot {
            Some(snapshot) => self.session.publish_epoch(snapshot, state.status()),
            None => self.session.set_font_status(state.status()),
        }
        ReloadTicket {
            version: state.current_version,
            token: state.current_load_token,
            had_active,
        }
    }

    /// Fetches and decodes the font for `ticket`, then swaps it in unless a
    /// newer reload has begun in the meantime.
    pub async fn finish(&self, ticket: ReloadTicket) -> ReloadOutcome {
        let ReloadTicket {
            version,
            token,
            had_active,
        } = ticket;

        let request = FontRequest::new(version);
        debug!(
            target = "preview.font",
            version,
            cache_buster = %request.cache_buster,
            "requesting compiled font"
        );
        let result = self.load(&request).await;

        let mut state = self.state.lock();
        if !state.is_current(version, token) {
            debug!(
                target = "preview.font",
                version,
                latest = state.current_version,
                ok = result.is_ok(),
                "discarding stale font load"
            );
            return ReloadOutcome::Stale { version };
        }

        let face = match result {
            Ok(face) => Arc::new(face),
            Err(err) => return self.fail(&mut state, version, had_active, &err),
        };

        let family = self.family_name(version);
        if let Err(err) = self.registry.register(&family, &face) {
            return self.fail(&mut state, version, had_active, &LoadError::from(err));
        }
        let previous = state.active.replace(ActiveFont {
            family: family.clone(),
            _face: face.clone(),
        });
        state.loaded = true;
        state.loading = false;

        if let Some(previous) = previous {
            if let Err(err) = self.registry.deregister(&previous.family) {
                warn!(
                    target = "preview.font",
                    family = %previous.family,
                    error = %err,
                    "failed to deregister previous font"
                );
            }
        }
        self.session.set_font_status(state.status());
        info!(
            target = "preview.font",
            version,
            family = %family,
            bytes = face.len(),
            glyphs = ?face.num_glyphs(),
            "font swapped"
        );
        ReloadOutcome::Swapped { version, family }
    }

    /// Deregisters the active face, if any. Used when the session is torn
    /// down; any reload still in flight becomes stale.
    pub fn retire(&self) {
        let mut state = self.state.lock();
        state.current_version += 1;
        state.current_load_token += 1;
        state.loaded = false;
        state.loading = false;
        if let Some(active) = state.active.take() {
            if let Err(err) = self.registry.deregister(&active.family) {
                warn!(
                    target = "preview.font",
                    family = %active.family,
                    error = %err,
                    "failed to deregister font on retire"
                );
            }
        }
        self.session.set_font_status(state.status());
    }

    async fn load(&self, request: &FontRequest) -> Result<FontFace, LoadError> {
        let data: Bytes = self.source.fetch_font(request).await?;
        Ok(FontFace::decode(data)?)
    }

    fn fail(
        &self,
        state: &mut FontLoadState,
        version: u64,
        had_active: bool,
        err: &LoadError,
    ) -> ReloadOutcome {
        warn!(
            target = "preview.font",
            version,
            error = %err,
            kept_previous = had_active,
            "font load failed"
        );
        state.loading = false;
        self.session.set_font_status(state.status());
        ReloadOutcome::Failed {
            version,
            kept_previous: had_active,
        }
    }
}
