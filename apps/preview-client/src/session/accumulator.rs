use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use preview_proto::{GlyphId, GlyphOverview, RawCharacterMap, ServerMessage};
use tracing::{debug, error, warn};

use super::hot_swap::{FontHotSwapper, ReloadTicket};
use super::state::SessionState;
use crate::model::{CharacterMap, Diagnostic, DiagnosticKind, FontSnapshot, MAX_GLYPH_ID};
use crate::transport::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    Idle,
    Accumulating,
}

#[derive(Debug, Default)]
enum AccumulationState {
    #[default]
    Idle,
    /// Glyphs of the epoch in flight, keyed by id. Ids may arrive in any order.
    Accumulating(BTreeMap<GlyphId, GlyphOverview>),
}

/// What handling one frame did.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Nothing changed: malformed or unknown frame, or a protocol violation.
    Ignored,
    EpochStarted,
    GlyphBuffered(GlyphId),
    /// A complete snapshot was published. `reload` is the font load begun in
    /// the same step when a swapper is attached; the caller must finish it.
    Published {
        snapshot: Arc<FontSnapshot>,
        reload: Option<ReloadTicket>,
    },
    /// The epoch in flight (if any) was dropped without publishing.
    Aborted,
}

impl Transition {
    pub fn published(&self) -> Option<&Arc<FontSnapshot>> {
        match self {
            Transition::Published { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    pub fn reload_ticket(&self) -> Option<ReloadTicket> {
        match self {
            Transition::Published { reload, .. } => *reload,
            _ => None,
        }
    }
}

/// Assembles push messages into complete snapshots. Publication happens only
/// at an explicit `EpochComplete`, never from counting glyphs.
pub struct EpochAccumulator {
    state: AccumulationState,
    session: Arc<SessionState>,
    swapper: Option<Arc<FontHotSwapper>>,
}

impl EpochAccumulator {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self {
            state: AccumulationState::Idle,
            session,
            swapper: None,
        }
    }

    /// Every published epoch also begins a reload on `swapper`, within the
    /// same transition. `swapper` must write to the same `session`.
    pub fn with_swapper(session: Arc<SessionState>, swapper: Arc<FontHotSwapper>) -> Self {
        Self {
            swapper: Some(swapper),
            ..Self::new(session)
        }
    }

    pub fn phase(&self) -> EpochPhase {
        match self.state {
            AccumulationState::Idle => EpochPhase::Idle,
            AccumulationState::Accumulating(_) => EpochPhase::Accumulating,
        }
    }

    /// Number of glyphs buffered for the epoch in flight.
    pub fn pending_glyphs(&self) -> usize {
        match &self.state {
            AccumulationState::Idle => 0,
            AccumulationState::Accumulating(buffer) => buffer.len(),
        }
    }

    pub fn handle_frame(&mut self, frame: Frame) -> Transition {
        match frame {
            Frame::Text(text) => self.handle_text(&text),
            Frame::Binary(data) => {
                error!(
                    target = "preview.epoch",
                    len = data.len(),
                    "received non-text frame from server"
                );
                Transition::Ignored
            }
        }
    }

    pub fn handle_text(&mut self, text: &str) -> Transition {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => self.handle_message(msg),
            Err(err) => {
                warn!(
                    target = "preview.epoch",
                    error = %err,
                    len = text.len(),
                    "malformed message from server"
                );
                Transition::Ignored
            }
        }
    }

    pub fn handle_message(&mut self, msg: ServerMessage) -> Transition {
        match msg {
            ServerMessage::PrepareForNewEpoch => self.begin_epoch(),
            ServerMessage::Glyph(glyph) => self.glyph_update(glyph),
            ServerMessage::EpochComplete { cmap } => self.end_epoch(&cmap),
            ServerMessage::Error { msg } => self.remote_error(msg),
            ServerMessage::Unknown => {
                warn!(target = "preview.epoch", "unknown message type from server");
                Transition::Ignored
            }
        }
    }

    /// Drops any partial epoch, e.g. because the channel went away. Returns
    /// whether there was one.
    pub fn reset(&mut self) -> bool {
        let was_accumulating = matches!(self.state, AccumulationState::Accumulating(_));
        self.state = AccumulationState::Idle;
        if was_accumulating {
            self.session.set_in_progress(false);
        }
        was_accumulating
    }

    fn begin_epoch(&mut self) -> Transition {
        if let AccumulationState::Accumulating(buffer) = &self.state {
            debug!(
                target = "preview.epoch",
                discarded = buffer.len(),
                "new epoch replaces unfinished one"
            );
        }
        self.state = AccumulationState::Accumulating(BTreeMap::new());
        self.session.set_in_progress(true);
        debug!(target = "preview.epoch", "epoch started");
        Transition::EpochStarted
    }

    fn glyph_update(&mut self, glyph: GlyphOverview) -> Transition {
        let AccumulationState::Accumulating(buffer) = &mut self.state else {
            error!(
                target = "preview.epoch",
                glyph_id = glyph.id,
                "received glyph before PrepareForNewEpoch"
            );
            self.session.record_diagnostic(Diagnostic::new(
                DiagnosticKind::GlyphOutsideEpoch,
                format!("glyph {} received outside an epoch", glyph.id),
            ));
            return Transition::Ignored;
        };
        if glyph.id > MAX_GLYPH_ID {
            warn!(target = "preview.epoch", glyph_id = glyph.id, "glyph id out of range");
            self.session.record_diagnostic(Diagnostic::new(
                DiagnosticKind::GlyphIdOutOfRange,
                format!("glyph id {} exceeds {}", glyph.id, MAX_GLYPH_ID),
            ));
            return Transition::Ignored;
        }
        let id = glyph.id;
        if buffer.insert(id, glyph).is_some() {
            debug!(target = "preview.epoch", glyph_id = id, "glyph replaced within epoch");
        }
        Transition::GlyphBuffered(id)
    }

    fn end_epoch(&mut self, raw_cmap: &RawCharacterMap) -> Transition {
        let buffer = match mem::take(&mut self.state) {
            AccumulationState::Accumulating(buffer) => buffer,
            AccumulationState::Idle => {
                error!(
                    target = "preview.epoch",
                    "received EpochComplete before PrepareForNewEpoch"
                );
                self.session.record_diagnostic(Diagnostic::new(
                    DiagnosticKind::EpochCompleteOutsideEpoch,
                    "epoch completion received outside an epoch",
                ));
                return Transition::Ignored;
            }
        };

        let (cmap, rejected) = CharacterMap::from_wire(raw_cmap);
        if !rejected.is_empty() {
            warn!(
                target = "preview.epoch",
                keys = ?rejected,
                "dropping cmap keys that are not a single character"
            );
        }

        let snapshot = FontSnapshot::new(buffer.into_values(), cmap);
        let missing = snapshot.missing_glyphs();
        if !missing.is_empty() {
            let message = format!("epoch incomplete: cmap references missing glyphs {missing:?}");
            error!(target = "preview.epoch", missing = ?missing, "epoch incomplete, not publishing");
            self.session.record_diagnostic(Diagnostic::new(
                DiagnosticKind::IncompleteEpoch,
                message.clone(),
            ));
            self.session.fail_epoch(message);
            return Transition::Aborted;
        }

        let snapshot = Arc::new(snapshot);
        let reload = match &self.swapper {
            Some(swapper) => Some(swapper.begin_reload_for(snapshot.clone())),
            None => {
                self.session.publish_snapshot(snapshot.clone());
                None
            }
        };
        debug!(
            target = "preview.epoch",
            glyphs = snapshot.glyph_count(),
            cmap_entries = snapshot.cmap().len(),
            reload_version = ?reload.map(|ticket| ticket.version()),
            "epoch published"
        );
        Transition::Published { snapshot, reload }
    }

    fn remote_error(&mut self, msg: String) -> Transition {
        let discarded = self.pending_glyphs();
        self.state = AccumulationState::Idle;
        warn!(
            target = "preview.epoch",
            discarded,
            error = %msg,
            "server reported an error"
        );
        self.session.fail_epoch(msg);
        Transition::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preview_proto::BoundingBox;
    use proptest::prelude::*;

    fn accumulator() -> (EpochAccumulator, Arc<SessionState>) {
        let session = Arc::new(SessionState::new());
        (EpochAccumulator::new(session.clone()), session)
    }

    fn glyph(id: GlyphId) -> ServerMessage {
        ServerMessage::Glyph(GlyphOverview::new(
            id,
            format!("<path d=\"M{id} 0\"/>"),
            BoundingBox::new(0.0, 0.0, 0.5, 0.7),
        ))
    }

    fn epoch_complete(entries: &[(&str, GlyphId)]) -> ServerMessage {
        ServerMessage::EpochComplete {
            cmap: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn full_epoch_publishes_snapshot() {
        let (mut acc, session) = accumulator();
        assert!(matches!(
            acc.handle_message(ServerMessage::PrepareForNewEpoch),
            Transition::EpochStarted
        ));
        assert!(session.in_progress());
        acc.handle_message(glyph(0));
        acc.handle_message(glyph(1));
        let transition = acc.handle_message(epoch_complete(&[("a", 0), ("b", 1)]));

        let published = transition.published().expect("published").clone();
        assert_eq!(published.glyph_count(), 2);
        assert!(!session.in_progress());
        assert_eq!(acc.phase(), EpochPhase::Idle);
        let rev = session.reverse_cmap();
        assert_eq!(rev.chars_for(0), &['a']);
        assert_eq!(rev.chars_for(1), &['b']);
        assert!(Arc::ptr_eq(&session.rendered_font().unwrap(), &published));
    }

    #[test]
    fn empty_epoch_is_valid() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        let transition = acc.handle_message(epoch_complete(&[]));
        assert!(transition.published().is_some());
        assert_eq!(session.rendered_font().unwrap().glyph_count(), 0);
    }

    #[test]
    fn glyphs_may_arrive_out_of_order() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        acc.handle_message(glyph(2));
        acc.handle_message(glyph(0));
        acc.handle_message(glyph(1));
        acc.handle_message(epoch_complete(&[("c", 2), ("a", 0)]));
        let font = session.rendered_font().unwrap();
        assert_eq!(font.glyph_count(), 3);
        assert_eq!(font.glyph_for_char('c').unwrap().id, 2);
    }

    #[test]
    fn glyph_outside_epoch_only_records_diagnostic() {
        let (mut acc, session) = accumulator();
        let before = session.view();
        assert!(matches!(acc.handle_message(glyph(5)), Transition::Ignored));
        assert_eq!(acc.phase(), EpochPhase::Idle);
        assert!(session.rendered_font().is_none());
        assert_eq!(session.in_progress(), before.in_progress);
        let diagnostics = session.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::GlyphOutsideEpoch);
    }

    #[test]
    fn epoch_complete_outside_epoch_never_publishes() {
        let (mut acc, session) = accumulator();
        let transition = acc.handle_message(epoch_complete(&[("a", 0)]));
        assert!(matches!(transition, Transition::Ignored));
        assert!(session.rendered_font().is_none());
        assert_eq!(
            session.diagnostics()[0].kind,
            DiagnosticKind::EpochCompleteOutsideEpoch
        );
    }

    #[test]
    fn remote_error_discards_partial_epoch() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        acc.handle_message(glyph(0));
        assert_eq!(acc.pending_glyphs(), 1);

        let transition = acc.handle_message(ServerMessage::Error { msg: "boom".into() });
        assert!(matches!(transition, Transition::Aborted));
        assert_eq!(acc.pending_glyphs(), 0);
        assert_eq!(acc.phase(), EpochPhase::Idle);
        assert_eq!(session.error().as_deref(), Some("boom"));
        assert!(!session.in_progress());
        assert!(session.rendered_font().is_none());

        // The old buffer must not leak into a later epoch.
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        acc.handle_message(epoch_complete(&[]));
        assert_eq!(session.rendered_font().unwrap().glyph_count(), 0);
    }

    #[test]
    fn begin_epoch_discards_previous_buffer() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        acc.handle_message(glyph(0));
        acc.handle_message(glyph(1));
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        assert_eq!(acc.pending_glyphs(), 0);
        acc.handle_message(glyph(0));
        acc.handle_message(epoch_complete(&[("a", 0)]));
        assert_eq!(session.rendered_font().unwrap().glyph_count(), 1);
    }

    #[test]
    fn incomplete_epoch_is_not_published() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        acc.handle_message(glyph(0));
        let transition = acc.handle_message(epoch_complete(&[("a", 0), ("b", 3)]));
        assert!(matches!(transition, Transition::Aborted));
        assert!(session.rendered_font().is_none());
        assert!(!session.in_progress());
        assert!(session.error().unwrap().contains("[3]"));
        assert_eq!(session.diagnostics()[0].kind, DiagnosticKind::IncompleteEpoch);
        assert_eq!(acc.phase(), EpochPhase::Idle);
    }

    #[test]
    fn out_of_range_glyph_ids_are_rejected() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        assert!(matches!(acc.handle_message(glyph(MAX_GLYPH_ID + 1)), Transition::Ignored));
        assert_eq!(acc.pending_glyphs(), 0);
        assert_eq!(acc.phase(), EpochPhase::Accumulating);
        assert_eq!(session.diagnostics()[0].kind, DiagnosticKind::GlyphIdOutOfRange);
    }

    #[test]
    fn bad_frames_change_nothing() {
        let (mut acc, session) = accumulator();
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        acc.handle_message(glyph(0));

        assert!(matches!(acc.handle_frame(Frame::Binary(vec![1, 2, 3])), Transition::Ignored));
        assert!(matches!(acc.handle_text("{not json"), Transition::Ignored));
        assert!(matches!(acc.handle_text(r#"{"t":"Mystery"}"#), Transition::Ignored));

        assert_eq!(acc.phase(), EpochPhase::Accumulating);
        assert_eq!(acc.pending_glyphs(), 1);
        assert!(session.in_progress());
        assert!(session.diagnostics().is_empty());
    }

    #[test]
    fn reset_clears_in_progress() {
        let (mut acc, session) = accumulator();
        assert!(!acc.reset());
        acc.handle_message(ServerMessage::PrepareForNewEpoch);
        assert!(acc.reset());
        assert!(!session.in_progress());
        assert_eq!(acc.phase(), EpochPhase::Idle);
    }

    #[derive(Debug, Clone)]
    enum Input {
        Message(ServerMessage),
        Raw(Frame),
    }

    fn arb_glyph_id() -> impl Strategy<Value = GlyphId> {
        prop_oneof![8 => 0..6u32, 1 => Just(MAX_GLYPH_ID + 1)]
    }

    fn arb_input() -> impl Strategy<Value = Input> {
        prop_oneof![
            2 => Just(Input::Message(ServerMessage::PrepareForNewEpoch)),
            4 => arb_glyph_id().prop_map(|id| Input::Message(glyph(id))),
            // Keys like "ab" are not a single character and get dropped.
            2 => prop::collection::btree_map("[a-d]|ab", 0..8u32, 0..4)
                .prop_map(|cmap| Input::Message(ServerMessage::EpochComplete { cmap })),
            1 => "[a-z ]{0,8}".prop_map(|msg| Input::Message(ServerMessage::Error { msg })),
            1 => "[A-Z][a-z]{0,6}"
                .prop_map(|tag| Input::Raw(Frame::Text(format!(r#"{{"t":"{tag}"}}"#)))),
            1 => ".{0,12}".prop_map(|text| Input::Raw(Frame::Text(text))),
            1 => prop::collection::vec(any::<u8>(), 0..8)
                .prop_map(|data| Input::Raw(Frame::Binary(data))),
        ]
    }

    fn same_snapshot(a: &Option<Arc<FontSnapshot>>, b: &Option<Arc<FontSnapshot>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    proptest! {
        #[test]
        fn rendered_font_is_never_partial(inputs in prop::collection::vec(arb_input(), 0..48)) {
            let (mut acc, session) = accumulator();
            for input in inputs {
                let phase = acc.phase();
                let pending = acc.pending_glyphs();
                let before = session.rendered_font();

                let transition = match input.clone() {
                    Input::Message(msg) => acc.handle_message(msg),
                    Input::Raw(frame) => acc.handle_frame(frame),
                };

                if let Some(font) = session.rendered_font() {
                    prop_assert!(font.missing_glyphs().is_empty());
                }
                if let Some(published) = transition.published() {
                    prop_assert!(same_snapshot(&session.rendered_font(), &Some(published.clone())));
                    prop_assert!(!session.in_progress());
                }

                let out_of_epoch = phase == EpochPhase::Idle
                    && matches!(
                        input,
                        Input::Message(ServerMessage::Glyph(_) | ServerMessage::EpochComplete { .. })
                    );
                if out_of_epoch || matches!(input, Input::Raw(_)) {
                    prop_assert!(transition.published().is_none());
                    prop_assert_eq!(acc.phase(), phase);
                    prop_assert_eq!(acc.pending_glyphs(), pending);
                    prop_assert!(same_snapshot(&before, &session.rendered_font()));
                }
            }
        }
    }
}
