//! Register bookkeeping: deduplication, area planning and redistribution.
//!
//! The [`MemoryManager`] owns every declared [`Register`]. Registers with the
//! same [`RegisterKey`] form one linked group that is read once and decoded
//! once per member. Groups are placed into the areas of their poll level;
//! after each read the manager copies the bytes into the area buffer,
//! decodes every member and reports changes through its [`ChangeNotifier`].
//!
//! # Example
//!
//! ```
//! use mewtocol::{ChangeNotifier, MemoryClass, MemoryConfig, MemoryManager, PlcType, RegisterDescriptor};
//!
//! let mut manager = MemoryManager::new(MemoryConfig::default(), ChangeNotifier::new());
//! manager.register(RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::Int)).unwrap();
//! manager.register(RegisterDescriptor::new(MemoryClass::DT, 105, PlcType::Int)).unwrap();
//!
//! let layout = manager.layout();
//! assert_eq!(layout.len(), 1);
//! assert_eq!((layout[0].start, layout[0].end), (100, 105));
//! ```

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::area::{AreaId, AreaLayout, PollLevel};
use crate::codec::{decode, PlcType, PlcValue};
use crate::error::{MewtocolError, Result};
use crate::memory::MemoryClass;
use crate::register::{
    Binding, ChangeNotifier, Register, RegisterDescriptor, RegisterId, RegisterKey, ValueChange,
};
use crate::utils::{get_bit, set_bit};

/// Default number of unused words tolerated to join two registers in one area.
pub const DEFAULT_MAX_OPTIMIZATION_DISTANCE: u32 = 8;

/// How a re-declared identity combines its poll levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LevelMergePolicy {
    /// Keep the faster (lower) level.
    #[default]
    Lowest,
    /// Keep the slower (higher) level.
    Highest,
}

impl LevelMergePolicy {
    /// Combines the group's level with a newly declared one.
    pub fn combine(self, current: u32, declared: u32) -> u32 {
        match self {
            LevelMergePolicy::Lowest => current.min(declared),
            LevelMergePolicy::Highest => current.max(declared),
        }
    }
}

/// Memory manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryConfig {
    /// Largest gap in words bridged by extending an area.
    pub max_optimization_distance: u32,
    /// Level combination for duplicate declarations.
    pub level_merge_policy: LevelMergePolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_optimization_distance: DEFAULT_MAX_OPTIMIZATION_DISTANCE,
            level_merge_policy: LevelMergePolicy::default(),
        }
    }
}

impl MemoryConfig {
    /// Sets the optimization distance; 0 only merges touching registers.
    pub fn with_max_optimization_distance(mut self, words: u32) -> Self {
        self.max_optimization_distance = words;
        self
    }

    /// Sets the level merge policy.
    pub fn with_level_merge_policy(mut self, policy: LevelMergePolicy) -> Self {
        self.level_merge_policy = policy;
        self
    }
}

/// One read the poller has to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// `RD` of a word area.
    Words {
        /// Poll level of the area.
        level: u32,
        /// Area identity, used to detect layout changes during the read.
        area: AreaId,
        /// Address class.
        class: MemoryClass,
        /// First word.
        start: u32,
        /// Last word.
        end: u32,
    },
    /// `RCC` of one relay word.
    Relay {
        /// Poll level of the slab.
        level: u32,
        /// Address class.
        class: MemoryClass,
        /// Relay word address.
        address: u32,
    },
}

impl ReadTarget {
    /// Poll level the target belongs to.
    pub fn level(&self) -> u32 {
        match self {
            ReadTarget::Words { level, .. } | ReadTarget::Relay { level, .. } => *level,
        }
    }
}

impl std::fmt::Display for ReadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadTarget::Words {
                level,
                class,
                start,
                end,
                ..
            } => write!(f, "L{level} {class}{start}-{end}"),
            ReadTarget::Relay {
                level,
                class,
                address,
            } => write!(f, "L{level} {class}{address:03}"),
        }
    }
}

#[derive(Debug, Clone)]
struct LinkedGroup {
    level: u32,
    members: Vec<RegisterId>,
}

/// Owner of all registers and their memory areas.
#[derive(Debug)]
pub struct MemoryManager {
    config: MemoryConfig,
    notifier: ChangeNotifier,
    registers: Vec<Register>,
    names: HashMap<String, RegisterId>,
    groups: HashMap<RegisterKey, LinkedGroup>,
    levels: BTreeMap<u32, PollLevel>,
    next_area: u64,
}

impl MemoryManager {
    /// Creates an empty manager that reports changes to `notifier`.
    pub fn new(config: MemoryConfig, notifier: ChangeNotifier) -> Self {
        Self {
            config,
            notifier,
            registers: Vec::new(),
            names: HashMap::new(),
            groups: HashMap::new(),
            levels: BTreeMap::new(),
            next_area: 0,
        }
    }

    /// Notifier used for change reports.
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Declares one register.
    ///
    /// Re-declaring a name for the same memory returns the existing handle;
    /// re-declaring an identity under a new name adds a member to its group.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` if the descriptor is invalid or its
    /// name is already bound to different memory. Nothing is placed then.
    pub fn register(&mut self, descriptor: RegisterDescriptor) -> Result<RegisterId> {
        self.check(&descriptor, &HashMap::new())?;
        Ok(self.insert(descriptor))
    }

    /// Declares several registers, all or none.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; no register is placed then.
    pub fn register_all(
        &mut self,
        descriptors: impl IntoIterator<Item = RegisterDescriptor>,
    ) -> Result<Vec<RegisterId>> {
        let descriptors: Vec<_> = descriptors.into_iter().collect();
        let mut pending = HashMap::new();
        for descriptor in &descriptors {
            self.check(descriptor, &pending)?;
            if let Some(name) = &descriptor.name {
                pending.insert(name.clone(), descriptor.key());
            }
        }
        Ok(descriptors.into_iter().map(|d| self.insert(d)).collect())
    }

    fn check(
        &self,
        descriptor: &RegisterDescriptor,
        pending: &HashMap<String, RegisterKey>,
    ) -> Result<()> {
        descriptor.validate()?;
        if let Some(name) = &descriptor.name {
            let bound = self
                .names
                .get(name)
                .map(|id| self.registers[id.0].key())
                .or_else(|| pending.get(name).copied());
            if let Some(bound) = bound {
                if bound != descriptor.key() {
                    return Err(MewtocolError::validation(format!(
                        "name '{name}' is already bound to {bound}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, descriptor: RegisterDescriptor) -> RegisterId {
        let key = descriptor.key();
        let declared = descriptor.poll_level;

        if let Some(id) = descriptor.name.as_ref().and_then(|n| self.names.get(n)) {
            let id = *id;
            self.fold_level(key, declared);
            return id;
        }

        let id = RegisterId(self.registers.len());
        if let Some(name) = &descriptor.name {
            self.names.insert(name.clone(), id);
        }
        self.registers.push(Register::new(id, descriptor));

        if self.groups.contains_key(&key) {
            if let Some(group) = self.groups.get_mut(&key) {
                group.members.push(id);
            }
            self.fold_level(key, declared);
        } else {
            self.groups.insert(
                key,
                LinkedGroup {
                    level: declared,
                    members: vec![id],
                },
            );
            self.place(key, declared);
        }
        debug!(register = %id, %key, "register declared");
        id
    }

    /// Applies the merge policy and moves the group if its level changed.
    fn fold_level(&mut self, key: RegisterKey, declared: u32) {
        let Some(group) = self.groups.get_mut(&key) else {
            return;
        };
        let current = group.level;
        let target = self.config.level_merge_policy.combine(current, declared);
        if target == current {
            return;
        }
        group.level = target;

        let carried = self.group_bytes(current, &key);
        if let Some(level) = self.levels.get_mut(&current) {
            level.remove(&key);
        }
        self.place(key, target);
        if let Some(bytes) = carried {
            self.patch_group(target, &key, &bytes);
        }
        debug!(%key, from = current, to = target, "group moved to new poll level");
    }

    fn place(&mut self, key: RegisterKey, level: u32) {
        let distance = self.config.max_optimization_distance;
        let next_area = &mut self.next_area;
        let mut next_id = || {
            *next_area += 1;
            AreaId(*next_area)
        };
        self.levels
            .entry(level)
            .or_default()
            .insert(key, distance, &mut next_id);
    }

    fn group_bytes(&self, level: u32, key: &RegisterKey) -> Option<Vec<u8>> {
        let level = self.levels.get(&level)?;
        if key.class.supports_bit_access() {
            let slab = level.slabs.get(&(key.class, key.address))?;
            Some(slab.word.to_le_bytes().to_vec())
        } else {
            level.area_of(key).map(|area| area.slice(key).to_vec())
        }
    }

    fn patch_group(&mut self, level: u32, key: &RegisterKey, bytes: &[u8]) {
        let Some(level) = self.levels.get_mut(&level) else {
            return;
        };
        if key.class.supports_bit_access() {
            if let (Some(slab), [lo, hi, ..]) =
                (level.slabs.get_mut(&(key.class, key.address)), bytes)
            {
                slab.word = u16::from_le_bytes([*lo, *hi]);
            }
        } else {
            for area in &mut level.areas {
                if area.contains(key) && area.groups.contains(key) {
                    area.write_bytes(key.address, bytes);
                }
            }
        }
    }

    /// Number of declared registers.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether no register is declared.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Looks a register up by handle.
    pub fn get(&self, id: RegisterId) -> Option<&Register> {
        self.registers.get(id.0)
    }

    /// Looks a register up by name.
    pub fn find(&self, name: &str) -> Option<&Register> {
        self.names.get(name).and_then(|id| self.get(*id))
    }

    /// All registers in declaration order.
    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    /// Current value of a register.
    pub fn value(&self, id: RegisterId) -> Option<&PlcValue> {
        self.get(id).and_then(Register::value)
    }

    /// Poll level the register's group is read at.
    pub fn effective_level(&self, id: RegisterId) -> Option<u32> {
        let key = self.get(id)?.key();
        self.groups.get(&key).map(|g| g.level)
    }

    /// Members sharing memory with `id`, itself included.
    pub fn group_members(&self, id: RegisterId) -> Vec<RegisterId> {
        self.get(id)
            .and_then(|r| self.groups.get(&r.key()))
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    /// Calls `binding` whenever register `id` changes.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidParameter` for an unknown handle.
    pub fn bind(&self, id: RegisterId, binding: Binding) -> Result<()> {
        if self.get(id).is_none() {
            return Err(MewtocolError::invalid_parameter(
                "id",
                format!("no register {id}"),
            ));
        }
        self.notifier.bind(id, binding);
        Ok(())
    }

    /// Poll levels holding at least one register, ascending.
    pub fn levels(&self) -> Vec<u32> {
        let mut levels: Vec<u32> = self.groups.values().map(|g| g.level).collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// Reads to perform for one level, in address order per class.
    ///
    /// Areas left without registers after a level move keep their bounds
    /// but are not read.
    pub fn read_plan(&self, level: u32) -> Vec<ReadTarget> {
        let Some(poll_level) = self.levels.get(&level) else {
            return Vec::new();
        };
        let mut areas: Vec<_> = poll_level
            .areas
            .iter()
            .filter(|a| !a.groups.is_empty())
            .collect();
        areas.sort_by_key(|a| (a.class, a.start));

        let words = areas.into_iter().map(|a| ReadTarget::Words {
            level,
            area: a.id,
            class: a.class,
            start: a.start,
            end: a.end,
        });
        let relays = poll_level
            .slabs
            .iter()
            .filter(|(_, slab)| !slab.groups.is_empty())
            .map(|((class, address), _)| ReadTarget::Relay {
                level,
                class: *class,
                address: *address,
            });
        words.chain(relays).collect()
    }

    /// Stores the bytes read for `target` and redistributes them.
    ///
    /// A target whose area changed since the plan was made is ignored; the
    /// next cycle reads the new layout.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` if the byte count does not
    /// match the target, or the first decode error among the members. All
    /// other members are still updated.
    pub fn apply_read(&mut self, target: &ReadTarget, bytes: &[u8]) -> Result<usize> {
        match *target {
            ReadTarget::Words {
                level,
                area,
                start,
                end,
                ..
            } => {
                let expected = (end - start + 1) as usize * 2;
                if bytes.len() != expected {
                    return Err(MewtocolError::invalid_response(format!(
                        "{target}: expected {expected} bytes, got {}",
                        bytes.len()
                    )));
                }
                let Some(word_area) = self.levels.get_mut(&level).and_then(|l| l.area_mut(area))
                else {
                    debug!(%target, "area vanished during read");
                    return Ok(0);
                };
                if (word_area.start, word_area.end) != (start, end) {
                    debug!(%target, "area grew during read, skipping stale data");
                    return Ok(0);
                }
                word_area.buffer.copy_from_slice(bytes);
                let keys = word_area.groups.clone();
                self.redistribute(level, &keys)
            }
            ReadTarget::Relay {
                level,
                class,
                address,
            } => {
                let [lo, hi] = bytes else {
                    return Err(MewtocolError::invalid_response(format!(
                        "{target}: expected 2 bytes, got {}",
                        bytes.len()
                    )));
                };
                let Some(slab) = self
                    .levels
                    .get_mut(&level)
                    .and_then(|l| l.slabs.get_mut(&(class, address)))
                else {
                    return Ok(0);
                };
                slab.word = u16::from_le_bytes([*lo, *hi]);
                let keys = slab.groups.clone();
                self.redistribute(level, &keys)
            }
        }
    }

    /// Patches bytes written to word memory into every area covering them.
    ///
    /// # Errors
    ///
    /// Returns the first decode error among the affected members.
    pub fn apply_written_words(
        &mut self,
        class: MemoryClass,
        start: u32,
        bytes: &[u8],
    ) -> Result<usize> {
        let mut touched = Vec::new();
        for (&level, poll_level) in &mut self.levels {
            for area in poll_level.areas.iter_mut().filter(|a| a.class == class) {
                if let Some((from, to)) = area.write_bytes(start, bytes) {
                    let keys: Vec<_> = area
                        .groups
                        .iter()
                        .filter(|k| k.address <= to && k.end_address() >= from)
                        .copied()
                        .collect();
                    touched.push((level, keys));
                }
            }
        }
        self.redistribute_all(touched)
    }

    /// Patches a written contact into every slab holding its relay word.
    ///
    /// # Errors
    ///
    /// Returns the first decode error among the affected members.
    pub fn apply_written_bit(
        &mut self,
        class: MemoryClass,
        area: u32,
        bit: u8,
        state: bool,
    ) -> Result<usize> {
        self.patch_relay(class, area, |word| {
            set_bit(u32::from(word), bit, state) as u16
        })
    }

    /// Patches a written relay word into every slab holding it.
    ///
    /// # Errors
    ///
    /// Returns the first decode error among the affected members.
    pub fn apply_written_relay_word(
        &mut self,
        class: MemoryClass,
        area: u32,
        word: u16,
    ) -> Result<usize> {
        self.patch_relay(class, area, |_| word)
    }

    fn patch_relay(
        &mut self,
        class: MemoryClass,
        area: u32,
        update: impl Fn(u16) -> u16,
    ) -> Result<usize> {
        let mut touched = Vec::new();
        for (&level, poll_level) in &mut self.levels {
            if let Some(slab) = poll_level.slabs.get_mut(&(class, area)) {
                slab.word = update(slab.word);
                touched.push((level, slab.groups.clone()));
            }
        }
        self.redistribute_all(touched)
    }

    fn redistribute_all(&mut self, touched: Vec<(u32, Vec<RegisterKey>)>) -> Result<usize> {
        let mut changed = 0;
        let mut first_error = None;
        for (level, keys) in touched {
            match self.redistribute(level, &keys) {
                Ok(n) => changed += n,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    /// Decodes each group's bytes into each of its members.
    fn redistribute(&mut self, level: u32, keys: &[RegisterKey]) -> Result<usize> {
        let mut changes: Vec<ValueChange> = Vec::new();
        let mut first_error = None;

        for key in keys {
            let Some(bytes) = self.group_bytes(level, key) else {
                continue;
            };
            let members = match self.groups.get(key) {
                Some(group) if group.level == level => group.members.clone(),
                _ => continue,
            };
            for id in members {
                let register = &mut self.registers[id.0];
                let decoded = match key.bit {
                    Some(bit) => {
                        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
                        Ok(PlcValue::Bool(get_bit(u32::from(word), bit)))
                    }
                    None => decode(&register.descriptor().ty, &bytes),
                };
                match decoded {
                    Ok(value) => changes.extend(register.set_value(Some(value))),
                    Err(e) => {
                        debug!(register = %id, error = %e, "decode failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        let count = changes.len();
        for change in changes {
            self.notifier.notify(change);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Forgets all values and zeroes all buffers.
    ///
    /// Listeners of registers that had a value are notified with `None`.
    pub fn clear_values(&mut self) {
        for level in self.levels.values_mut() {
            level.clear();
        }
        let changes: Vec<_> = self
            .registers
            .iter_mut()
            .filter_map(|r| r.set_value(None))
            .collect();
        for change in changes {
            self.notifier.notify(change);
        }
    }

    /// Current areas and slabs, by level then class and address.
    pub fn layout(&self) -> Vec<AreaLayout> {
        let mut layout = Vec::new();
        for (&level, poll_level) in &self.levels {
            let mut areas: Vec<_> = poll_level
                .areas
                .iter()
                .map(|a| AreaLayout {
                    level,
                    class: a.class,
                    start: a.start,
                    end: a.end,
                    groups: a.groups.len(),
                })
                .collect();
            areas.sort_by_key(|a| (a.class, a.start));
            layout.extend(areas);
            layout.extend(poll_level.slabs.iter().map(|((class, address), slab)| {
                AreaLayout {
                    level,
                    class: *class,
                    start: *address,
                    end: *address,
                    groups: slab.groups.len(),
                }
            }));
        }
        layout
    }

    /// Declared type of a register.
    pub fn declared_type(&self, id: RegisterId) -> Option<&PlcType> {
        self.get(id).map(|r| &r.descriptor().ty)
    }
}
