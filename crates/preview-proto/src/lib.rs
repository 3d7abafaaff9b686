//! Wire types shared between the font preview backend and its clients.
//!
//! The backend pushes JSON text frames over `/api/ws`, each tagged by the
//! `t` field. A full re-render arrives as one epoch:
//! `PrepareForNewEpoch`, any number of `Glyph` frames, then `EpochComplete`
//! carrying the character map. `Error` may arrive at any point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod detail;

pub use detail::GlyphDetail;

/// Glyph identifier assigned by the backend. Clients never mint these.
pub type GlyphId = u32;

/// Character map exactly as it appears on the wire. Keys are expected to be a
/// single Unicode scalar but that is not enforced at this layer.
pub type RawCharacterMap = BTreeMap<String, GlyphId>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ServerMessage {
    /// A new epoch starts; anything buffered from an older one is void.
    PrepareForNewEpoch,
    /// One rendered glyph of the current epoch. Fields are inline.
    Glyph(GlyphOverview),
    /// The epoch is complete and may be flushed to the UI.
    EpochComplete { cmap: RawCharacterMap },
    /// Font evaluation failed on the backend.
    Error { msg: String },
    /// Any tag this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PrepareForNewEpoch => "PrepareForNewEpoch",
            ServerMessage::Glyph(_) => "Glyph",
            ServerMessage::EpochComplete { .. } => "EpochComplete",
            ServerMessage::Error { .. } => "Error",
            ServerMessage::Unknown => "Unknown",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Minimal rendering of one glyph, enough to draw a preview tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphOverview {
    pub id: GlyphId,
    pub svg: String,
    #[serde(flatten)]
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set when the backend failed to render this particular glyph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance: Option<f64>,
}

impl GlyphOverview {
    pub fn new(id: GlyphId, svg: impl Into<String>, bounding_box: BoundingBox) -> Self {
        Self {
            id,
            svg: svg.into(),
            bounding_box,
            name: None,
            error: None,
            advance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}
