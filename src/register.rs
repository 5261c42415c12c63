//! Register declarations, identities and change notification.
//!
//! A [`RegisterDescriptor`] says where a value lives and how to decode it.
//! Its [`RegisterKey`] (class, address, byte length, special bit) is the
//! identity used for deduplication: two descriptors with the same key read
//! the same PLC memory and share one buffer.
//!
//! # Example
//!
//! ```
//! use mewtocol::{MemoryClass, PlcType, RegisterDescriptor};
//!
//! let speed = RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::DInt)
//!     .with_name("motor_speed")
//!     .with_poll_level(2);
//! assert!(speed.validate().is_ok());
//! assert_eq!(speed.key().end_address(), 101);
//!
//! let start_button = RegisterDescriptor::bit(MemoryClass::X, 0, 3);
//! assert_eq!(start_button.to_string(), "X0003");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::codec::{PlcType, PlcValue};
use crate::error::{MewtocolError, Result};
use crate::memory::MemoryClass;

/// Capacity of the broadcast channel carrying [`ValueChange`]s.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Handle of a declared register, unique within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(pub(crate) usize);

impl RegisterId {
    /// Position of the register in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Memory identity of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterKey {
    /// Address class.
    pub class: MemoryClass,
    /// Word address, or relay word ("area") for bit classes.
    pub address: u32,
    /// Bytes occupied in PLC memory.
    pub byte_len: usize,
    /// Special bit inside the relay word.
    pub bit: Option<u8>,
}

impl RegisterKey {
    /// Number of 16-bit words covered.
    pub fn word_len(&self) -> u32 {
        u32::try_from(self.byte_len / 2).unwrap_or(u32::MAX).max(1)
    }

    /// Last word address covered.
    pub fn end_address(&self) -> u32 {
        self.address.saturating_add(self.word_len() - 1)
    }
}

impl std::fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "{}{:03}{:X}", self.class, self.address, bit),
            None if self.word_len() > 1 => {
                write!(f, "{}{}-{}", self.class, self.address, self.end_address())
            }
            None => write!(f, "{}{}", self.class, self.address),
        }
    }
}

/// Declaration of a register supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterDescriptor {
    /// Optional unique name.
    pub name: Option<String>,
    /// Address class.
    pub class: MemoryClass,
    /// Word address, or relay word for bit classes.
    pub address: u32,
    /// Special bit (0–15) for single contacts of bit classes.
    pub bit: Option<u8>,
    /// Declared logical type.
    pub ty: PlcType,
    /// Poll level, 1 is refreshed every cycle.
    pub poll_level: u32,
}

impl RegisterDescriptor {
    /// Declares a word register (or a whole relay word) at poll level 1.
    pub fn new(class: MemoryClass, address: u32, ty: PlcType) -> Self {
        Self {
            name: None,
            class,
            address,
            bit: None,
            ty,
            poll_level: 1,
        }
    }

    /// Declares a single contact of a relay word at poll level 1.
    pub fn bit(class: MemoryClass, area: u32, bit: u8) -> Self {
        Self {
            name: None,
            class,
            address: area,
            bit: Some(bit),
            ty: PlcType::Bool,
            poll_level: 1,
        }
    }

    /// Sets the register name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the poll level.
    pub fn with_poll_level(mut self, level: u32) -> Self {
        self.poll_level = level;
        self
    }

    /// Identity used to share memory between declarations.
    pub fn key(&self) -> RegisterKey {
        RegisterKey {
            class: self.class,
            address: self.address,
            byte_len: self.ty.byte_len(),
            bit: self.bit,
        }
    }

    /// Checks the declaration against the addressing rules of its class.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` when:
    /// - the type itself is invalid (see [`PlcType::validate`])
    /// - the poll level is 0
    /// - the register would extend past the class's highest address
    /// - a bit index is out of range, given for a word class, or typed other than `Bool`
    /// - a relay register spans more than one word
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::{MemoryClass, PlcType, RegisterDescriptor};
    ///
    /// let overflow = RegisterDescriptor::new(MemoryClass::DT, 99_999, PlcType::DInt);
    /// assert!(overflow.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        self.ty.validate()?;

        if self.poll_level == 0 {
            return Err(MewtocolError::validation(format!(
                "{self}: poll level must be at least 1"
            )));
        }

        let key = self.key();
        let max = self.class.max_address();
        if u64::from(self.address) + u64::from(key.word_len()) - 1 > u64::from(max) {
            return Err(MewtocolError::validation(format!(
                "{self}: {} words from {}{} exceed {}{max}",
                key.word_len(),
                self.class,
                self.address,
                self.class
            )));
        }

        if self.class.supports_bit_access() {
            match self.bit {
                Some(bit) if bit > 15 => Err(MewtocolError::validation(format!(
                    "{self}: bit index {bit} out of range 0-15"
                ))),
                Some(_) if self.ty != PlcType::Bool => Err(MewtocolError::validation(format!(
                    "{self}: single contacts must be BOOL, declared {}",
                    self.ty
                ))),
                None if key.byte_len != 2 || self.ty == PlcType::Bool => {
                    Err(MewtocolError::validation(format!(
                        "{self}: relay words hold one 16-bit value, declared {}",
                        self.ty
                    )))
                }
                _ => Ok(()),
            }
        } else if self.bit.is_some() {
            Err(MewtocolError::validation(format!(
                "{self}: {} registers have no special bits",
                self.class
            )))
        } else if self.ty == PlcType::Bool {
            Err(MewtocolError::validation(format!(
                "{self}: BOOL needs a relay class, use BITS16 for {} words",
                self.class
            )))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Display for RegisterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.key_text()),
            None => f.write_str(&self.key_text()),
        }
    }
}

impl RegisterDescriptor {
    fn key_text(&self) -> String {
        match self.bit {
            Some(bit) => format!("{}{:03}{:X}", self.class, self.address, bit),
            None => format!("{}{}", self.class, self.address),
        }
    }
}

/// A declared register and its last known value.
#[derive(Debug, Clone)]
pub struct Register {
    id: RegisterId,
    descriptor: RegisterDescriptor,
    value: Option<PlcValue>,
}

impl Register {
    pub(crate) fn new(id: RegisterId, descriptor: RegisterDescriptor) -> Self {
        Self {
            id,
            descriptor,
            value: None,
        }
    }

    /// Handle of this register.
    pub fn id(&self) -> RegisterId {
        self.id
    }

    /// Declaration as supplied by the caller.
    pub fn descriptor(&self) -> &RegisterDescriptor {
        &self.descriptor
    }

    /// Name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.descriptor.name.as_deref()
    }

    /// Memory identity.
    pub fn key(&self) -> RegisterKey {
        self.descriptor.key()
    }

    /// Last value read or written, `None` before the first read and after disconnect.
    pub fn value(&self) -> Option<&PlcValue> {
        self.value.as_ref()
    }

    /// Replaces the value, returning the change if it differs.
    pub(crate) fn set_value(&mut self, value: Option<PlcValue>) -> Option<ValueChange> {
        if self.value == value {
            return None;
        }
        let old = std::mem::replace(&mut self.value, value);
        Some(ValueChange {
            id: self.id,
            name: self.descriptor.name.clone(),
            key: self.key(),
            old,
            new: self.value.clone(),
        })
    }
}

/// Notification that a register's value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    /// Register that changed.
    pub id: RegisterId,
    /// Its name, if any.
    pub name: Option<String>,
    /// Its memory identity.
    pub key: RegisterKey,
    /// Previous value.
    pub old: Option<PlcValue>,
    /// New value, `None` when cleared on disconnect.
    pub new: Option<PlcValue>,
}

/// Callback invoked with a register's new value.
pub type Binding = Box<dyn Fn(Option<&PlcValue>) + Send + Sync>;

/// Fans value changes out to subscribers and per-register bindings.
///
/// Changes are delivered synchronously on the task that decoded them.
/// Binding closures therefore must not block or call back into the client.
///
/// # Example
///
/// ```
/// use mewtocol::ChangeNotifier;
///
/// let notifier = ChangeNotifier::new();
/// let mut changes = notifier.subscribe();
/// assert!(changes.try_recv().is_err());
/// ```
#[derive(Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ValueChange>,
    bindings: Arc<Mutex<HashMap<RegisterId, Vec<Binding>>>>,
}

impl ChangeNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            sender,
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Receives every change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ValueChange> {
        self.sender.subscribe()
    }

    /// Calls `binding` whenever register `id` changes.
    pub fn bind(&self, id: RegisterId, binding: Binding) {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .push(binding);
    }

    /// Delivers one change.
    pub(crate) fn notify(&self, change: ValueChange) {
        {
            let bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(list) = bindings.get(&change.id) {
                for binding in list {
                    binding(change.new.as_ref());
                }
            }
        }
        // no receivers is not an error
        let _ = self.sender.send(change);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("receivers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_key_identity() {
        let a = RegisterDescriptor::new(MemoryClass::DT, 10, PlcType::Word).with_name("a");
        let b = RegisterDescriptor::new(MemoryClass::DT, 10, PlcType::Int).with_name("b");
        let c = RegisterDescriptor::new(MemoryClass::DT, 10, PlcType::DWord);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(c.key().end_address(), 11);
    }

    #[test]
    fn test_validate_word_overflow() {
        assert!(RegisterDescriptor::new(MemoryClass::DT, 99_998, PlcType::DInt)
            .validate()
            .is_ok());
        let err = RegisterDescriptor::new(MemoryClass::FL, 99_999, PlcType::Real)
            .validate()
            .unwrap_err();
        assert!(matches!(err, MewtocolError::Validation { .. }));

        let huge = PlcType::array(PlcType::Word, 1usize << 32);
        let huge = RegisterDescriptor::new(MemoryClass::DT, 5, huge);
        assert!(matches!(
            huge.validate().unwrap_err(),
            MewtocolError::Validation { .. }
        ));
        let too_long = PlcType::array(PlcType::Word, 99_996);
        let too_long = RegisterDescriptor::new(MemoryClass::DT, 5, too_long);
        assert!(too_long.validate().is_err());
        assert_eq!(huge.key().word_len(), u32::MAX);
    }

    #[test]
    fn test_validate_bits() {
        assert!(RegisterDescriptor::bit(MemoryClass::R, 999, 15).validate().is_ok());
        assert!(RegisterDescriptor::bit(MemoryClass::R, 1000, 0).validate().is_err());
        assert!(RegisterDescriptor::bit(MemoryClass::Y, 0, 16).validate().is_err());
        assert!(RegisterDescriptor::new(MemoryClass::DT, 0, PlcType::Bool)
            .validate()
            .is_err());
        let mut misuse = RegisterDescriptor::new(MemoryClass::DT, 0, PlcType::Word);
        misuse.bit = Some(1);
        assert!(misuse.validate().is_err());
    }

    #[test]
    fn test_validate_relay_word() {
        assert!(RegisterDescriptor::new(MemoryClass::R, 5, PlcType::Bits16)
            .validate()
            .is_ok());
        assert!(RegisterDescriptor::new(MemoryClass::R, 5, PlcType::DWord)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_poll_level() {
        let desc = RegisterDescriptor::new(MemoryClass::DT, 0, PlcType::Int).with_poll_level(0);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_display() {
        let desc = RegisterDescriptor::new(MemoryClass::DT, 7, PlcType::Int).with_name("level");
        assert_eq!(desc.to_string(), "level (DT7)");
        assert_eq!(RegisterDescriptor::bit(MemoryClass::R, 10, 0xB).to_string(), "R010B");
        assert_eq!(
            RegisterDescriptor::new(MemoryClass::DT, 7, PlcType::DInt).key().to_string(),
            "DT7-8"
        );
    }

    #[test]
    fn test_set_value_reports_changes_once() {
        let mut reg = Register::new(
            RegisterId(0),
            RegisterDescriptor::new(MemoryClass::DT, 0, PlcType::Int),
        );
        let change = reg.set_value(Some(PlcValue::Int(5))).unwrap();
        assert_eq!(change.old, None);
        assert_eq!(change.new, Some(PlcValue::Int(5)));
        assert!(reg.set_value(Some(PlcValue::Int(5))).is_none());
        assert!(reg.set_value(None).is_some());
        assert!(reg.value().is_none());
    }

    #[test]
    fn test_notifier_calls_bindings_and_subscribers() {
        let notifier = ChangeNotifier::new();
        let mut rx = notifier.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        notifier.bind(
            RegisterId(3),
            Box::new(move |value: Option<&PlcValue>| {
                assert_eq!(value, Some(&PlcValue::Word(9)));
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut reg = Register::new(
            RegisterId(3),
            RegisterDescriptor::new(MemoryClass::DT, 0, PlcType::Word),
        );
        if let Some(change) = reg.set_value(Some(PlcValue::Word(9))) {
            notifier.notify(change);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap().id, RegisterId(3));
    }
}
