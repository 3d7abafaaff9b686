//! Registry of renderable font faces, keyed by family name.
//!
//! A registry never owns a face. Whoever registers a face keeps the strong
//! reference and is responsible for deregistering it; the registry only holds
//! a `Weak` so a face that was dropped without being deregistered simply stops
//! resolving.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use read_fonts::{FontRef, TableProvider};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("font binary rejected: {0}")]
    Decode(String),
    #[error("family {0} is already registered")]
    AlreadyRegistered(String),
    #[error("family {0} is not registered")]
    NotRegistered(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A compiled font binary that has been validated as loadable.
#[derive(Debug)]
pub struct FontFace {
    data: Bytes,
    table_count: usize,
    num_glyphs: Option<u16>,
}

impl FontFace {
    /// Parses the table directory of `data`. Fails for anything that is not a
    /// single sfnt font (ttf/otf).
    pub fn decode(data: Bytes) -> RegistryResult<Self> {
        let font = FontRef::new(data.as_ref()).map_err(|err| RegistryError::Decode(err.to_string()))?;
        let table_count = font.table_directory.table_records().len();
        let num_glyphs = font.maxp().ok().map(|maxp| maxp.num_glyphs());
        Ok(Self {
            data,
            table_count,
            num_glyphs,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.table_count
    }

    /// Glyph count from `maxp`, when the font carries one.
    pub fn num_glyphs(&self) -> Option<u16> {
        self.num_glyphs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered(String),
    Deregistered(String),
}

pub trait FontRegistry: Send + Sync {
    fn register(&self, family: &str, face: &Arc<FontFace>) -> RegistryResult<()>;
    fn deregister(&self, family: &str) -> RegistryResult<()>;
    fn is_registered(&self, family: &str) -> bool;
}

/// In-process registry for the CLI and tests. Records every add/remove so
/// swap ordering can be inspected afterwards.
#[derive(Debug, Default)]
pub struct InMemoryFontRegistry {
    faces: parking_lot::RwLock<HashMap<String, Weak<FontFace>>>,
    events: parking_lot::Mutex<Vec<RegistryEvent>>,
}

impl InMemoryFontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered family names, sorted.
    pub fn families(&self) -> Vec<String> {
        let mut names: Vec<String> = self.faces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves a family to its face if the owner still holds it.
    pub fn face(&self, family: &str) -> Option<Arc<FontFace>> {
        self.faces.read().get(family).and_then(Weak::upgrade)
    }

    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().clone()
    }

    pub fn removal_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, RegistryEvent::Deregistered(_)))
            .count()
    }
}

impl FontRegistry for InMemoryFontRegistry {
    fn register(&self, family: &str, face: &Arc<FontFace>) -> RegistryResult<()> {
        let mut guard = self.faces.write();
        if guard.contains_key(family) {
            return Err(RegistryError::AlreadyRegistered(family.to_string()));
        }
        guard.insert(family.to_string(), Arc::downgrade(face));
        self.events
            .lock()
            .push(RegistryEvent::Registered(family.to_string()));
        debug!(target = "font.registry", family, bytes = face.len(), "registered face");
        Ok(())
    }

    fn deregister(&self, family: &str) -> RegistryResult<()> {
        let mut guard = self.faces.write();
        if guard.remove(family).is_none() {
            return Err(RegistryError::NotRegistered(family.to_string()));
        }
        self.events
            .lock()
            .push(RegistryEvent::Deregistered(family.to_string()));
        debug!(target = "font.registry", family, "deregistered face");
        Ok(())
    }

    fn is_registered(&self, family: &str) -> bool {
        self.faces.read().contains_key(family)
    }
}
