//! Contiguous memory areas and relay slabs of one poll level.
//!
//! Word registers of one class are packed into [`WordArea`]s: contiguous word
//! ranges read with a single `RD` command. Registers closer to an existing
//! area than the optimization distance extend it instead of opening a new
//! area, trading a few unused words for fewer round trips. Relay registers
//! live in one [`RelaySlab`] per relay word and are never distance-merged.
//!
//! Areas only grow. Their buffers hold the last bytes read, at offset
//! `(address - start) * 2`.

use std::collections::BTreeMap;

use crate::memory::MemoryClass;
use crate::register::RegisterKey;

/// Identity of a word area within one memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(pub(crate) u64);

/// Contiguous word range of one class.
#[derive(Debug, Clone)]
pub(crate) struct WordArea {
    pub id: AreaId,
    pub class: MemoryClass,
    pub start: u32,
    pub end: u32,
    pub buffer: Vec<u8>,
    /// Identities whose bytes live here, in insertion order.
    pub groups: Vec<RegisterKey>,
}

impl WordArea {
    /// Creates an area spanning exactly `key`.
    pub fn new(id: AreaId, key: &RegisterKey) -> Self {
        let mut area = Self {
            id,
            class: key.class,
            start: key.address,
            end: key.end_address(),
            buffer: Vec::new(),
            groups: Vec::new(),
        };
        area.buffer = vec![0; area.byte_len()];
        area
    }

    pub fn word_count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn byte_len(&self) -> usize {
        self.word_count() as usize * 2
    }

    pub fn contains(&self, key: &RegisterKey) -> bool {
        key.class == self.class && key.address >= self.start && key.end_address() <= self.end
    }

    /// Words between the area and a range, 0 if they overlap.
    pub fn gap(&self, start: u32, end: u32) -> u32 {
        if start > self.end {
            start - self.end
        } else if end < self.start {
            self.start - end
        } else {
            0
        }
    }

    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        start <= self.end && end >= self.start
    }

    /// Grows the area to cover `start..=end`, keeping bytes at their address.
    pub fn expand(&mut self, start: u32, end: u32) {
        let new_start = self.start.min(start);
        let new_end = self.end.max(end);
        if new_start == self.start && new_end == self.end {
            return;
        }
        let mut buffer = vec![0; (new_end - new_start + 1) as usize * 2];
        let offset = (self.start - new_start) as usize * 2;
        buffer[offset..offset + self.buffer.len()].copy_from_slice(&self.buffer);
        self.start = new_start;
        self.end = new_end;
        self.buffer = buffer;
    }

    /// Takes over another area of the same class.
    pub fn absorb(&mut self, other: WordArea) {
        self.expand(other.start, other.end);
        let offset = (other.start - self.start) as usize * 2;
        self.buffer[offset..offset + other.buffer.len()].copy_from_slice(&other.buffer);
        for key in other.groups {
            self.attach(key);
        }
    }

    pub fn attach(&mut self, key: RegisterKey) {
        if !self.groups.contains(&key) {
            self.groups.push(key);
        }
    }

    pub fn detach(&mut self, key: &RegisterKey) -> bool {
        let before = self.groups.len();
        self.groups.retain(|k| k != key);
        before != self.groups.len()
    }

    /// Bytes of a contained register.
    pub fn slice(&self, key: &RegisterKey) -> &[u8] {
        let offset = (key.address - self.start) as usize * 2;
        &self.buffer[offset..offset + key.byte_len]
    }

    /// Patches the part of `bytes` (starting at word `start`) that falls inside
    /// the area. Returns the covered word range.
    pub fn write_bytes(&mut self, start: u32, bytes: &[u8]) -> Option<(u32, u32)> {
        let words = (bytes.len() / 2) as u32;
        if words == 0 {
            return None;
        }
        let end = start + words - 1;
        if !self.overlaps(start, end) {
            return None;
        }
        let from = start.max(self.start);
        let to = end.min(self.end);
        let src = (from - start) as usize * 2;
        let dst = (from - self.start) as usize * 2;
        let len = (to - from + 1) as usize * 2;
        self.buffer[dst..dst + len].copy_from_slice(&bytes[src..src + len]);
        Some((from, to))
    }
}

/// One relay word holding single contacts or whole-word registers.
#[derive(Debug, Clone)]
pub(crate) struct RelaySlab {
    pub word: u16,
    pub groups: Vec<RegisterKey>,
}

/// Areas and slabs refreshed at one cadence.
#[derive(Debug, Clone, Default)]
pub(crate) struct PollLevel {
    pub areas: Vec<WordArea>,
    pub slabs: BTreeMap<(MemoryClass, u32), RelaySlab>,
}

impl PollLevel {
    /// Places `key` into this level.
    ///
    /// Returns the area holding it, `None` for relay registers.
    pub fn insert(
        &mut self,
        key: RegisterKey,
        max_distance: u32,
        next_id: &mut dyn FnMut() -> AreaId,
    ) -> Option<AreaId> {
        if key.class.supports_bit_access() {
            let slab = self
                .slabs
                .entry((key.class, key.address))
                .or_insert_with(|| RelaySlab {
                    word: 0,
                    groups: Vec::new(),
                });
            if !slab.groups.contains(&key) {
                slab.groups.push(key);
            }
            return None;
        }

        if let Some(area) = self.areas.iter_mut().find(|a| a.contains(&key)) {
            area.attach(key);
            return Some(area.id);
        }

        let start = key.address;
        let end = key.end_address();
        let nearest = self
            .areas
            .iter()
            .enumerate()
            .filter(|(_, a)| a.class == key.class)
            .map(|(i, a)| (i, a.gap(start, end)))
            .filter(|&(_, gap)| gap <= max_distance)
            // first area wins ties
            .min_by_key(|&(i, gap)| (gap, i))
            .map(|(i, _)| i);

        let id = match nearest {
            Some(index) => {
                let area = &mut self.areas[index];
                area.expand(start, end);
                area.attach(key);
                area.id
            }
            None => {
                let mut area = WordArea::new(next_id(), &key);
                area.attach(key);
                let id = area.id;
                self.areas.push(area);
                id
            }
        };
        self.coalesce(key.class, max_distance);
        self.area_of(&key).map(|a| a.id).or(Some(id))
    }

    /// Merges areas of `class` that overlap or lie within `max_distance`.
    fn coalesce(&mut self, class: MemoryClass, max_distance: u32) {
        loop {
            let mut pair = None;
            'search: for i in 0..self.areas.len() {
                if self.areas[i].class != class {
                    continue;
                }
                for j in (i + 1)..self.areas.len() {
                    let (a, b) = (&self.areas[i], &self.areas[j]);
                    if b.class == class && a.gap(b.start, b.end) <= max_distance {
                        pair = Some((i, j));
                        break 'search;
                    }
                }
            }
            match pair {
                Some((i, j)) => {
                    let other = self.areas.remove(j);
                    self.areas[i].absorb(other);
                }
                None => break,
            }
        }
    }

    /// Removes `key` from whatever holds it; areas keep their bounds.
    pub fn remove(&mut self, key: &RegisterKey) {
        if key.class.supports_bit_access() {
            if let Some(slab) = self.slabs.get_mut(&(key.class, key.address)) {
                slab.groups.retain(|k| k != key);
            }
        } else {
            for area in &mut self.areas {
                area.detach(key);
            }
        }
    }

    /// Area holding a word register.
    pub fn area_of(&self, key: &RegisterKey) -> Option<&WordArea> {
        self.areas
            .iter()
            .find(|a| a.contains(key) && a.groups.contains(key))
    }

    pub fn area_mut(&mut self, id: AreaId) -> Option<&mut WordArea> {
        self.areas.iter_mut().find(|a| a.id == id)
    }

    pub fn clear(&mut self) {
        for area in &mut self.areas {
            area.buffer.iter_mut().for_each(|b| *b = 0);
        }
        for slab in self.slabs.values_mut() {
            slab.word = 0;
        }
    }
}

/// Snapshot of one area or relay slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaLayout {
    /// Poll level.
    pub level: u32,
    /// Address class.
    pub class: MemoryClass,
    /// First word address.
    pub start: u32,
    /// Last word address.
    pub end: u32,
    /// Number of distinct register identities inside.
    pub groups: usize,
}

impl std::fmt::Display for AreaLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "L{} {}{}-{} ({} groups)",
            self.level, self.class, self.start, self.end, self.groups
        )
    }
}
