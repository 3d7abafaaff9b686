//! Payloads of `GET /api/glyph/{id}`: the construction tree of one glyph with
//! its debug geometry.

use serde::{Deserialize, Serialize};

use crate::GlyphId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphDetail {
    pub overview: GlyphOverviewDetail,
    #[serde(default)]
    pub guidelines: Guidelines,
    #[serde(default)]
    pub construction: Vec<SerializedGlyphConstruction>,
    /// Construction step whose curve is the final outline, if any.
    pub result_id: Option<u32>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl GlyphDetail {
    pub fn construction_step(&self, id: u32) -> Option<&SerializedGlyphConstruction> {
        self.construction.iter().find(|step| step.id == id)
    }

    pub fn result(&self) -> Option<&SerializedGlyphConstruction> {
        self.result_id.and_then(|id| self.construction_step(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphOverviewDetail {
    pub id: GlyphId,
    pub ch: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub outline: Vec<CubicBezier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub pos: f64,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guidelines {
    #[serde(default)]
    pub h: Vec<Guideline>,
    #[serde(default)]
    pub v: Vec<Guideline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedGlyphConstruction {
    pub id: u32,
    #[serde(flatten)]
    pub kind: ConstructionKind,
    pub result_curve: Option<Vec<CubicBezier>>,
    #[serde(default)]
    pub debug_points: Vec<DebugPoint>,
    #[serde(default)]
    pub debug_lines: Vec<DebugLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum ConstructionKind {
    Spiro {
        curve: Vec<Vec<SpiroPoint>>,
    },
    CubicBezier {
        curve: Vec<CubicBezier>,
    },
    Stroke {
        parent: u32,
        width: f64,
        curve: Vec<Vec<SpiroPoint>>,
    },
    SpiroToBezier {
        parent: u32,
    },
    BooleanAdd {
        parents: Vec<u32>,
    },
}

impl ConstructionKind {
    /// Construction steps this one was derived from.
    pub fn parents(&self) -> Vec<u32> {
        match self {
            ConstructionKind::Spiro { .. } | ConstructionKind::CubicBezier { .. } => Vec::new(),
            ConstructionKind::Stroke { parent, .. } | ConstructionKind::SpiroToBezier { parent } => {
                vec![*parent]
            }
            ConstructionKind::BooleanAdd { parents } => parents.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum CubicSegment {
    Line { p2: Point2D },
    Curve { c1: Point2D, c2: Point2D, p2: Point2D },
}

impl CubicSegment {
    pub fn end(&self) -> Point2D {
        match self {
            CubicSegment::Line { p2 } | CubicSegment::Curve { p2, .. } => *p2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubicBezier {
    pub start: Point2D,
    pub segments: Vec<CubicSegment>,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugPointKind {
    Corner,
    Curve,
    Control,
    Misc,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugPoint {
    #[serde(flatten)]
    pub at: Point2D,
    pub kind: DebugPointKind,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugLine {
    pub from: Point2D,
    pub to: Point2D,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpiroKind {
    Corner,
    G4,
    G2,
    Flat,
    Curl,
    Anchor,
    Handle,
    Open,
    EndOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpiroPoint {
    #[serde(flatten)]
    pub at: Point2D,
    pub ty: SpiroKind,
}
