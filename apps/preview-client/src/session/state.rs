//! Observable aggregate of one preview session.
//!
//! Readers call [`SessionState::view`] for the current value or
//! [`SessionState::subscribe`] to be woken on every change. Only the epoch
//! accumulator and the font hot-swapper write, through the crate-private
//! setters below.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{Diagnostic, FontSnapshot, ReverseCharacterMap};

/// Diagnostics beyond this many are dropped oldest-first.
pub const DIAGNOSTIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Established,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontStatus {
    /// Family name of the font resource currently registered as active.
    pub family: Option<String>,
    pub loaded: bool,
    pub loading: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub connection: ConnectionStatus,
    /// The client is currently receiving a new epoch.
    pub in_progress: bool,
    /// Last complete epoch.
    pub rendered_font: Option<Arc<FontSnapshot>>,
    /// Last error reported by the backend (or an epoch that could not be
    /// published).
    pub error: Option<String>,
    pub font: FontStatus,
    pub diagnostics: VecDeque<Diagnostic>,
    /// Diagnostics recorded over the session, including dropped ones.
    pub diagnostics_total: u64,
}

impl SessionView {
    pub fn connection_established(&self) -> bool {
        self.connection == ConnectionStatus::Established
    }
}

#[derive(Debug)]
pub struct SessionState {
    tx: watch::Sender<SessionView>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionView::default());
        Self { tx }
    }

    pub fn view(&self) -> SessionView {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.tx.subscribe()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.tx.borrow().connection
    }

    pub fn connection_established(&self) -> bool {
        self.tx.borrow().connection_established()
    }

    pub fn in_progress(&self) -> bool {
        self.tx.borrow().in_progress
    }

    pub fn rendered_font(&self) -> Option<Arc<FontSnapshot>> {
        self.tx.borrow().rendered_font.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.tx.borrow().error.clone()
    }

    pub fn font_status(&self) -> FontStatus {
        self.tx.borrow().font.clone()
    }

    pub fn font_family(&self) -> Option<String> {
        self.tx.borrow().font.family.clone()
    }

    pub fn font_loaded(&self) -> bool {
        self.tx.borrow().font.loaded
    }

    pub fn font_loading(&self) -> bool {
        self.tx.borrow().font.loading
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.tx.borrow().diagnostics.iter().cloned().collect()
    }

    /// Reverse character map of the current snapshot; empty when nothing has
    /// been published.
    pub fn reverse_cmap(&self) -> ReverseCharacterMap {
        self.rendered_font()
            .map(|font| font.reverse_cmap().clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_connection(&self, status: ConnectionStatus) {
        self.tx.send_if_modified(|view| {
            if view.connection == status {
                return false;
            }
            view.connection = status;
            true
        });
    }

    pub(crate) fn set_in_progress(&self, in_progress: bool) {
        self.tx.send_if_modified(|view| {
            if view.in_progress == in_progress {
                return false;
            }
            view.in_progress = in_progress;
            true
        });
    }

    /// Swaps in a complete snapshot and clears the in-progress flag in one
    /// update, so no observer sees the new font while still "receiving".
    pub(crate) fn publish_snapshot(&self, snapshot: Arc<FontSnapshot>) {
        self.tx.send_modify(|view| {
            view.rendered_font = Some(snapshot);
            view.in_progress = false;
        });
    }

    /// Publishes a snapshot together with the font load it starts.
    pub(crate) fn publish_epoch(&self, snapshot: Arc<FontSnapshot>, font: FontStatus) {
        self.tx.send_modify(|view| {
            view.rendered_font = Some(snapshot);
            view.in_progress = false;
            view.font = font;
        });
    }

    /// Ends the epoch in flight without publishing.
    pub(crate) fn fail_epoch(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|view| {
            view.error = Some(message);
            view.in_progress = false;
        });
    }

    pub(crate) fn record_diagnostic(&self, diagnostic: Diagnostic) {
        self.tx.send_modify(|view| {
            if view.diagnostics.len() == DIAGNOSTIC_CAPACITY {
                view.diagnostics.pop_front();
            }
            view.diagnostics.push_back(diagnostic);
            view.diagnostics_total += 1;
        });
    }

    pub(crate) fn set_font_status(&self, status: FontStatus) {
        self.tx.send_if_modified(|view| {
            if view.font == status {
                return false;
            }
            view.font = status;
            true
        });
    }
}
