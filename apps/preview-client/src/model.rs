use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use once_cell::sync::OnceCell;
use preview_proto::{GlyphId, GlyphOverview, RawCharacterMap};

/// Largest glyph id a compiled font can address (`maxp.numGlyphs` is a u16).
pub const MAX_GLYPH_ID: GlyphId = u16::MAX as GlyphId;

/// Character to glyph mapping of one published font.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterMap(BTreeMap<char, GlyphId>);

impl CharacterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts the wire map, returning the keys that are not exactly one
    /// Unicode scalar alongside the converted map.
    pub fn from_wire(raw: &RawCharacterMap) -> (Self, Vec<String>) {
        let mut map = BTreeMap::new();
        let mut rejected = Vec::new();
        for (key, id) in raw {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => {
                    map.insert(ch, *id);
                }
                _ => rejected.push(key.clone()),
            }
        }
        (Self(map), rejected)
    }

    pub fn insert(&mut self, ch: char, id: GlyphId) -> Option<GlyphId> {
        self.0.insert(ch, id)
    }

    pub fn get(&self, ch: char) -> Option<GlyphId> {
        self.0.get(&ch).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, GlyphId)> + '_ {
        self.0.iter().map(|(ch, id)| (*ch, *id))
    }

    /// Distinct glyph ids referenced by the map.
    pub fn glyph_ids(&self) -> BTreeSet<GlyphId> {
        self.0.values().copied().collect()
    }

    pub fn reverse(&self) -> ReverseCharacterMap {
        let mut rev: BTreeMap<GlyphId, Vec<char>> = BTreeMap::new();
        for (ch, id) in self.iter() {
            rev.entry(id).or_default().push(ch);
        }
        ReverseCharacterMap(rev)
    }
}

impl FromIterator<(char, GlyphId)> for CharacterMap {
    fn from_iter<I: IntoIterator<Item = (char, GlyphId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Glyph id to the characters bound to it. Always derived from a
/// [`CharacterMap`], characters in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseCharacterMap(BTreeMap<GlyphId, Vec<char>>);

impl ReverseCharacterMap {
    pub fn chars_for(&self, id: GlyphId) -> &[char] {
        self.0.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GlyphId, &[char])> + '_ {
        self.0.iter().map(|(id, chars)| (*id, chars.as_slice()))
    }
}

/// Immutable result of one completed epoch.
#[derive(Debug)]
pub struct FontSnapshot {
    glyphs: Vec<Option<GlyphOverview>>,
    cmap: CharacterMap,
    reverse: OnceCell<ReverseCharacterMap>,
}

impl FontSnapshot {
    /// Lays glyphs out by id. Slots for ids that never arrived stay empty.
    pub fn new(glyphs: impl IntoIterator<Item = GlyphOverview>, cmap: CharacterMap) -> Self {
        let mut slots: Vec<Option<GlyphOverview>> = Vec::new();
        for glyph in glyphs {
            let idx = glyph.id as usize;
            if idx >= slots.len() {
                slots.resize(idx + 1, None);
            }
            slots[idx] = Some(glyph);
        }
        Self {
            glyphs: slots,
            cmap,
            reverse: OnceCell::new(),
        }
    }

    /// One past the highest glyph id present.
    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    pub fn glyph(&self, id: GlyphId) -> Option<&GlyphOverview> {
        self.glyphs.get(id as usize).and_then(Option::as_ref)
    }

    pub fn glyphs(&self) -> impl Iterator<Item = &GlyphOverview> + '_ {
        self.glyphs.iter().flatten()
    }

    pub fn cmap(&self) -> &CharacterMap {
        &self.cmap
    }

    pub fn glyph_for_char(&self, ch: char) -> Option<&GlyphOverview> {
        self.cmap.get(ch).and_then(|id| self.glyph(id))
    }

    /// Ids referenced by the character map that have no glyph.
    pub fn missing_glyphs(&self) -> Vec<GlyphId> {
        self.cmap
            .glyph_ids()
            .into_iter()
            .filter(|id| self.glyph(*id).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_glyphs().is_empty()
    }

    /// Computed on first use and kept for the lifetime of the snapshot.
    pub fn reverse_cmap(&self) -> &ReverseCharacterMap {
        self.reverse.get_or_init(|| self.cmap.reverse())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    GlyphOutsideEpoch,
    EpochCompleteOutsideEpoch,
    GlyphIdOutOfRange,
    IncompleteEpoch,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticKind::GlyphOutsideEpoch => "glyph outside epoch",
            DiagnosticKind::EpochCompleteOutsideEpoch => "epoch complete outside epoch",
            DiagnosticKind::GlyphIdOutOfRange => "glyph id out of range",
            DiagnosticKind::IncompleteEpoch => "incomplete epoch",
        };
        f.write_str(label)
    }
}

/// A protocol violation observed on the push channel. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharListEntry {
    pub charcode: u32,
    /// `u+` followed by at least four lowercase hex digits.
    pub unicode: String,
    pub ch: char,
}

pub fn char_list(chars: impl IntoIterator<Item = char>) -> Vec<CharListEntry> {
    chars
        .into_iter()
        .map(|ch| {
            let charcode = ch as u32;
            CharListEntry {
                charcode,
                unicode: format!("u+{charcode:04x}"),
                ch,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use preview_proto::BoundingBox;

    fn glyph(id: GlyphId) -> GlyphOverview {
        GlyphOverview::new(id, format!("<path id=\"{id}\"/>"), BoundingBox::default())
    }

    #[test]
    fn reverse_map_groups_characters_by_glyph() {
        let cmap: CharacterMap = [('a', 0), ('b', 1), ('A', 0)].into_iter().collect();
        let rev = cmap.reverse();
        assert_eq!(rev.chars_for(0), &['A', 'a']);
        assert_eq!(rev.chars_for(1), &['b']);
        assert!(rev.chars_for(7).is_empty());
        assert_eq!(rev.len(), 2);
    }

    #[test]
    fn wire_keys_must_be_single_scalars() {
        let mut raw = RawCharacterMap::new();
        raw.insert("a".into(), 0);
        raw.insert("é".into(), 1);
        raw.insert("ab".into(), 2);
        raw.insert(String::new(), 3);
        let (cmap, rejected) = CharacterMap::from_wire(&raw);
        assert_eq!(cmap.len(), 2);
        assert_eq!(cmap.get('é'), Some(1));
        assert_eq!(rejected, vec![String::new(), "ab".to_string()]);
    }

    #[test]
    fn snapshot_indexes_sparse_glyphs_by_id() {
        let cmap: CharacterMap = [('a', 0), ('c', 2)].into_iter().collect();
        let snapshot = FontSnapshot::new(vec![glyph(2), glyph(0)], cmap);
        assert_eq!(snapshot.glyph_count(), 3);
        assert!(snapshot.glyph(1).is_none());
        assert_eq!(snapshot.glyph_for_char('c').map(|g| g.id), Some(2));
        assert_eq!(snapshot.glyphs().count(), 2);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn snapshot_reports_missing_glyphs() {
        let cmap: CharacterMap = [('a', 0), ('b', 4)].into_iter().collect();
        let snapshot = FontSnapshot::new(vec![glyph(0)], cmap);
        assert_eq!(snapshot.missing_glyphs(), vec![4]);
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn reverse_cmap_is_cached_per_snapshot() {
        let cmap: CharacterMap = [('x', 0)].into_iter().collect();
        let snapshot = FontSnapshot::new(vec![glyph(0)], cmap);
        let first = snapshot.reverse_cmap() as *const ReverseCharacterMap;
        let second = snapshot.reverse_cmap() as *const ReverseCharacterMap;
        assert_eq!(first, second);
        assert_eq!(snapshot.reverse_cmap().chars_for(0), &['x']);
    }

    #[test]
    fn char_list_formats_code_points() {
        let entries = char_list("a€😀".chars());
        assert_eq!(entries[0].unicode, "u+0061");
        assert_eq!(entries[1].unicode, "u+20ac");
        assert_eq!(entries[2].unicode, "u+1f600");
        assert_eq!(entries[2].charcode, 0x1f600);
    }
}
