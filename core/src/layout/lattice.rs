//! Lattice element table.
//!
//! ```text
//! 0            num_elements
//! 8            relative offset of the name table (0 = names not stored)
//! 16 + 16·i    kind of element i
//! 24 + 16·i    relative offset of element i's body
//! body:        payload length | payload (zero-padded to a word)
//! name table:  count | relative offset per name | (length | utf-8 bytes)…
//! ```
//!
//! The element payloads are opaque to the runner. Only the kernel knows how
//! to interpret a kind; the runner only recognises monitors.

use super::{
    pad_to_word, read_i64, read_len, require_len, resolve_offset, span, word_from_len, ByteWriter,
    WORD,
};
use crate::{
    error::{SimError, SimResult},
    types::ElementIndex,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const RECORD: &str = "lattice";

pub const LATTICE_HEADER: usize = 2 * WORD;
pub const ELEMENT_STRIDE: usize = 2 * WORD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementKind(pub i64);

impl ElementKind {
    /// Beam monitor. Its samples live in the simulation state, not the lattice.
    pub const MONITOR: ElementKind = ElementKind(1);
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRef<'a> {
    pub kind:    ElementKind,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lattice {
    bytes: Vec<u8>,
}

impl Lattice {
    pub fn decode(bytes: &[u8]) -> SimResult<Self> {
        require_len(RECORD, bytes, LATTICE_HEADER)?;
        let count = read_len(RECORD, bytes, 0, "element count")?;
        require_len(RECORD, bytes, LATTICE_HEADER + span(RECORD, count, ELEMENT_STRIDE)?)?;

        for index in 0..count {
            let entry = LATTICE_HEADER + index * ELEMENT_STRIDE;
            let kind = read_i64(bytes, entry);
            if kind < 0 {
                return Err(SimError::malformed(RECORD, format!("element {index} has negative kind {kind}")));
            }
            let body = resolve_offset(RECORD, bytes, entry + WORD, WORD)?;
            let len = read_len(RECORD, bytes, body, "payload length")?;
            require_len(RECORD, bytes, body + WORD + pad_to_word(len))?;
        }

        if read_i64(bytes, WORD) != 0 {
            let table = resolve_offset(RECORD, bytes, WORD, WORD)?;
            let names = read_len(RECORD, bytes, table, "name count")?;
            if names != count {
                return Err(SimError::malformed(
                    RECORD,
                    format!("{names} names for {count} elements"),
                ));
            }
            require_len(RECORD, bytes, table + WORD + span(RECORD, names, WORD)?)?;
            for index in 0..names {
                let at = resolve_offset(RECORD, bytes, table + WORD + index * WORD, WORD)?;
                let len = read_len(RECORD, bytes, at, "name length")?;
                require_len(RECORD, bytes, at + WORD + pad_to_word(len))?;
                std::str::from_utf8(&bytes[at + WORD..at + WORD + len])
                    .map_err(|e| SimError::malformed(RECORD, format!("name {index}: {e}")))?;
            }
        }

        Ok(Self { bytes: bytes.to_vec() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn num_elements(&self) -> usize {
        read_i64(&self.bytes, 0) as usize
    }

    pub fn element(&self, index: ElementIndex) -> Option<ElementRef<'_>> {
        if index >= self.num_elements() {
            return None;
        }
        let entry = LATTICE_HEADER + index * ELEMENT_STRIDE;
        let body = read_i64(&self.bytes, entry + WORD) as usize;
        let len = read_i64(&self.bytes, body) as usize;
        Some(ElementRef {
            kind:    ElementKind(read_i64(&self.bytes, entry)),
            payload: &self.bytes[body + WORD..body + WORD + len],
        })
    }

    pub fn has_names(&self) -> bool {
        read_i64(&self.bytes, WORD) != 0
    }

    pub fn name(&self, index: ElementIndex) -> Option<&str> {
        if !self.has_names() || index >= self.num_elements() {
            return None;
        }
        let table = read_i64(&self.bytes, WORD) as usize;
        let at = read_i64(&self.bytes, table + WORD + index * WORD) as usize;
        let len = read_i64(&self.bytes, at) as usize;
        std::str::from_utf8(&self.bytes[at + WORD..at + WORD + len]).ok()
    }

    /// Index of the first element called `name`.
    pub fn position(&self, name: &str) -> Option<ElementIndex> {
        (0..self.num_elements()).find(|&i| self.name(i) == Some(name))
    }

    /// First non-monitor element whose kind `supported` rejects.
    pub fn first_unsupported(
        &self,
        supported: impl Fn(ElementKind) -> bool,
    ) -> Option<(ElementIndex, ElementKind)> {
        (0..self.num_elements())
            .filter_map(|index| self.element(index).map(|e| (index, e.kind)))
            .find(|&(_, kind)| kind != ElementKind::MONITOR && !supported(kind))
    }

    pub fn kind_counts(&self) -> BTreeMap<ElementKind, usize> {
        let mut counts = BTreeMap::new();
        for index in 0..self.num_elements() {
            if let Some(element) = self.element(index) {
                *counts.entry(element.kind).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Assembles a lattice element by element.
#[derive(Debug)]
pub struct LatticeBuilder {
    elements:    Vec<(String, ElementKind, Vec<u8>)>,
    store_names: bool,
}

impl Default for LatticeBuilder {
    fn default() -> Self { Self::new() }
}

impl LatticeBuilder {
    pub fn new() -> Self {
        Self { elements: Vec::new(), store_names: true }
    }

    /// Whether element names are written into the lattice (default: yes).
    pub fn store_names(mut self, store: bool) -> Self {
        self.store_names = store;
        self
    }

    pub fn push(&mut self, name: impl Into<String>, kind: ElementKind, payload: Vec<u8>) -> ElementIndex {
        self.elements.push((name.into(), kind, payload));
        self.elements.len() - 1
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn build(self) -> Lattice {
        let mut w = ByteWriter::default();
        w.push_i64(word_from_len(self.elements.len()));
        let names_slot = w.reserve_word();

        let body_slots: Vec<usize> = self
            .elements
            .iter()
            .map(|(_, kind, _)| {
                w.push_i64(kind.0);
                w.reserve_word()
            })
            .collect();

        for ((_, _, payload), slot) in self.elements.iter().zip(body_slots) {
            let at = w.position();
            w.patch_i64(slot, word_from_len(at));
            w.push_i64(word_from_len(payload.len()));
            w.push_padded(payload);
        }

        if self.store_names {
            let table = w.position();
            w.patch_i64(names_slot, word_from_len(table));
            w.push_i64(word_from_len(self.elements.len()));
            let name_slots: Vec<usize> = self.elements.iter().map(|_| w.reserve_word()).collect();
            for ((name, _, _), slot) in self.elements.iter().zip(name_slots) {
                let at = w.position();
                w.patch_i64(slot, word_from_len(at));
                w.push_i64(word_from_len(name.len()));
                w.push_padded(name.as_bytes());
            }
        }

        Lattice { bytes: w.into_bytes() }
    }
}
