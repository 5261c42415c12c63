//! MEWTOCOL session: command queue, register memory and background polling.
//!
//! This module provides the [`Client`] struct, the primary interface for
//! talking to a Panasonic PLC.
//!
//! # Overview
//!
//! The client handles:
//! - Opening the TCP or serial transport and confirming the PLC with `RT`
//! - Serializing every command through one FIFO queue, one frame in flight
//! - Timeouts, stale byte draining and multi-frame continuation
//! - Keeping declared registers synchronized through the [`Poller`]
//! - Tearing the session down when the transport fails
//!
//! # Example
//!
//! ```no_run
//! use mewtocol::{Client, ClientConfig, MemoryClass, PlcType, PlcValue, RegisterDescriptor};
//!
//! # async fn example() -> mewtocol::Result<()> {
//! let client = Client::new(ClientConfig::tcp("192.168.1.5"));
//!
//! let speed = client.register(
//!     RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::Int).with_name("speed"),
//! )?;
//! let info = client.connect().await?;
//! println!("connected to {info}");
//!
//! client.wait_first_cycle().await?;
//! println!("speed = {:?}", client.value(speed));
//!
//! client.write_register(speed, &PlcValue::Int(1200)).await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! `Client` is a cheap handle around shared state and can be cloned into any
//! task. Change notifications run on the task that processed the read while
//! the register memory is locked, so bindings must not call back into the
//! client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::area::AreaLayout;
use crate::codec::{decode, encode, PlcValue};
use crate::command::{
    Command, ExtendedStatusCommand, ModeCommand, OperationMode, ReadBitCommand,
    ReadRelayWordCommand, ReadWordCommand, StatusCommand, WriteBitCommand,
    WriteRelayWordCommand, WriteWordCommand,
};
use crate::error::{MewtocolError, Result};
use crate::frame::{continuation_request, ChecksumKind, FrameAssembler, FrameStatus, Station};
use crate::manager::{MemoryConfig, MemoryManager, ReadTarget};
use crate::memory::MemoryClass;
use crate::poller::{PollState, PollTarget, Poller, PollerConfig, PollerStats};
use crate::register::{Binding, ChangeNotifier, RegisterDescriptor, RegisterId, ValueChange};
use crate::response::MewtocolResponse;
use crate::status::PlcInfo;
use crate::transport::{self, Transport, TransportConfig, TransportStats, DEFAULT_TIMEOUT};

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Configuration for creating a MEWTOCOL client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where the PLC is.
    pub transport: TransportConfig,
    /// Station addressed by every command.
    pub station: Station,
    /// Checksum appended to frames.
    pub checksum: ChecksumKind,
    /// Bound on one request/response exchange.
    pub timeout: Duration,
    /// Bound on opening the transport.
    pub connect_timeout: Duration,
    /// Log every frame at debug level.
    pub frame_logging: bool,
    /// Start the poller on connect.
    pub auto_poll: bool,
    /// Area merging settings.
    pub memory: MemoryConfig,
    /// Poll cadence settings.
    pub poller: PollerConfig,
}

impl ClientConfig {
    /// Creates a configuration with default settings for `transport`.
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            station: Station::default(),
            checksum: ChecksumKind::default(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            frame_logging: false,
            auto_poll: true,
            memory: MemoryConfig::default(),
            poller: PollerConfig::default(),
        }
    }

    /// Creates a TCP configuration; the port defaults to 9094.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::ClientConfig;
    /// use mewtocol::transport::TransportConfig;
    ///
    /// let config = ClientConfig::tcp("192.168.1.5");
    /// assert_eq!(config.transport, TransportConfig::tcp("192.168.1.5:9094"));
    /// ```
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new(TransportConfig::tcp(addr))
    }

    /// Creates a serial configuration with 8 data bits, odd parity and one stop bit.
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self::new(TransportConfig::serial(port, baud_rate))
    }

    /// Sets the station number (default is any station, `EE`).
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::{ClientConfig, Station};
    ///
    /// let config = ClientConfig::tcp("192.168.1.5").with_station(Station::new(1).unwrap());
    /// ```
    pub fn with_station(mut self, station: Station) -> Self {
        self.station = station;
        self
    }

    /// Sets the checksum variant (default is BCC).
    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the exchange timeout (default is 2 seconds).
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::tcp("192.168.1.5").with_timeout(Duration::from_millis(500));
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the transport open timeout (default is 2 seconds).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables frame logging.
    pub fn with_frame_logging(mut self, enabled: bool) -> Self {
        self.frame_logging = enabled;
        self
    }

    /// Controls whether connecting starts the poller (default is on).
    pub fn with_auto_poll(mut self, enabled: bool) -> Self {
        self.auto_poll = enabled;
        self
    }

    /// Sets the area merging settings.
    pub fn with_memory_config(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the poll cadence settings.
    pub fn with_poller_config(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the heartbeat interval (default is 3 seconds).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.poller.heartbeat_interval = interval;
        self
    }
}

/// Session lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The PLC answered `RT`.
    Connected(PlcInfo),
    /// The session closed, on request or after a transport fault.
    Disconnected {
        /// Why.
        reason: String,
    },
}

#[derive(Default)]
struct Link {
    transport: Option<Box<dyn Transport>>,
    // a finished exchange left unread bytes behind
    needs_drain: bool,
    // set while a request awaits its reply, still set if the caller gave up
    in_flight: bool,
}

#[derive(Default)]
struct Counters {
    stats: TransportStats,
    connected_at: Option<Instant>,
}

struct Shared {
    config: ClientConfig,
    // tokio's mutex grants the lock in request order
    link: tokio::sync::Mutex<Link>,
    memory: Mutex<MemoryManager>,
    poller: Poller,
    connected: AtomicBool,
    plc_info: Mutex<Option<PlcInfo>>,
    counters: Mutex<Counters>,
    events: broadcast::Sender<SessionEvent>,
}

/// The exchange succeeded; a register that cannot decode the new bytes
/// keeps its old value.
fn log_patch(patched: Result<usize>) {
    if let Err(e) = patched {
        warn!(error = %e, "register does not decode the written bytes");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn memory(&self) -> MutexGuard<'_, MemoryManager> {
        lock(&self.memory)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        lock(&self.counters)
    }

    fn log_frame(&self, direction: &str, frame: &str) {
        if self.config.frame_logging {
            debug!(direction, frame = %frame.trim_end_matches('\r'), "frame");
        }
    }

    async fn send_counted(&self, transport: &mut dyn Transport, frame: &str) -> Result<()> {
        self.log_frame("tx", frame);
        transport.send(frame).await?;
        let mut counters = self.counters();
        counters.stats.bytes_sent += frame.len() as u64;
        counters.stats.frames_sent += 1;
        Ok(())
    }

    /// Sends one command frame and collects every frame of its response.
    async fn roundtrip(&self, transport: &mut dyn Transport, frame: &str) -> Result<String> {
        self.send_counted(transport, frame).await?;
        let mut assembler = FrameAssembler::new(self.config.checksum);
        loop {
            let reply = transport.read_frame().await?;
            {
                let mut counters = self.counters();
                counters.stats.bytes_received += reply.len() as u64;
                counters.stats.frames_received += 1;
            }
            self.log_frame("rx", &reply);
            match assembler.push(&reply)? {
                FrameStatus::Complete => return assembler.finish(),
                FrameStatus::NeedsContinuation => {
                    let request = continuation_request(self.config.station);
                    self.send_counted(transport, &request).await?;
                }
            }
        }
    }

    /// Waits out the reply of a command whose caller stopped waiting, then
    /// drops whatever else arrived.
    async fn settle(&self, transport: &mut dyn Transport) -> Result<()> {
        match timeout(self.config.timeout, transport.read_frame()).await {
            Ok(Ok(stale)) => {
                self.log_frame("rx", &stale);
                debug!("discarded the reply of a cancelled command");
            }
            Ok(Err(e)) if e.is_transport_fault() => return Err(e),
            Ok(Err(_)) | Err(_) => {}
        }
        transport.drain().await.map(|_| ())
    }

    /// Runs one command through the queue.
    ///
    /// Dropping the returned future only affects its own caller: the next
    /// command first consumes the abandoned reply.
    async fn exchange<C: Command + Sync>(&self, command: &C) -> Result<MewtocolResponse> {
        let frame = command.to_frame(self.config.station, self.config.checksum);
        let mut link = self.link.lock().await;
        let Link {
            transport,
            needs_drain,
            in_flight,
        } = &mut *link;
        let Some(active) = transport.as_mut() else {
            return Err(MewtocolError::NotConnected);
        };

        let mut result = Ok(String::new());
        if *in_flight {
            result = self.settle(active.as_mut()).await.map(|_| String::new());
            *in_flight = false;
            *needs_drain = false;
        } else if *needs_drain {
            result = active.drain().await.map(|_| String::new());
            *needs_drain = false;
        }
        if result.is_ok() {
            *in_flight = true;
            result = match timeout(self.config.timeout, self.roundtrip(active.as_mut(), &frame)).await
            {
                Ok(outcome) => outcome,
                Err(_) if active.received_since_send() == 0 => {
                    Err(MewtocolError::ConfigurationMismatch)
                }
                Err(_) => Err(MewtocolError::Timeout),
            };
            *in_flight = false;
        }

        let error = match result.and_then(|logical| MewtocolResponse::parse(&logical)) {
            Ok(response) => {
                drop(link);
                response.expect_code(command.response_code())?;
                return Ok(response);
            }
            Err(e) => e,
        };

        if error.is_transport_fault() {
            if let Some(mut dead) = transport.take() {
                let _ = dead.close().await;
            }
            drop(link);
            self.counters().stats.errors += 1;
            self.mark_disconnected(error.to_string(), false);
            return Err(error);
        }

        match error {
            MewtocolError::PlcError { .. } => {}
            MewtocolError::Timeout | MewtocolError::ConfigurationMismatch => {
                *needs_drain = true;
                self.counters().stats.timeouts += 1;
                warn!(command = %command.body(), error = %error, "exchange timed out");
            }
            _ => {
                *needs_drain = true;
                self.counters().stats.errors += 1;
            }
        }
        Err(error)
    }

    /// Closes the transport after a fault seen outside a command exchange.
    ///
    /// Must not wait on the poller, the poll task calls it.
    async fn teardown(&self, reason: String) {
        let dead = self.link.lock().await.transport.take();
        if let Some(mut dead) = dead {
            let _ = dead.close().await;
        }
        self.mark_disconnected(reason, false);
    }

    /// Marks the session closed and notifies listeners once.
    fn mark_disconnected(&self, reason: String, requested: bool) {
        self.poller.signal_stop();
        self.memory().clear_values();
        *lock(&self.plc_info) = None;
        self.counters().connected_at = None;
        if self.connected.swap(false, Ordering::SeqCst) {
            if requested {
                info!(reason = %reason, "session closed");
            } else {
                warn!(reason = %reason, "session torn down");
            }
            let _ = self.events.send(SessionEvent::Disconnected { reason });
        }
    }

    async fn status(&self) -> Result<PlcInfo> {
        let response = self.exchange(&StatusCommand).await?;
        let info = PlcInfo::parse(&response.data)?;
        *lock(&self.plc_info) = Some(info.clone());
        Ok(info)
    }

    async fn read_target(&self, target: &ReadTarget) -> Result<()> {
        let bytes = match *target {
            ReadTarget::Words {
                class, start, end, ..
            } => {
                let command = ReadWordCommand::new(class, start, (end - start + 1) as usize)?;
                self.exchange(&command).await?.to_bytes()?
            }
            ReadTarget::Relay { class, address, .. } => {
                let command = ReadRelayWordCommand::new(class, address, 1)?;
                self.exchange(&command).await?.to_bytes()?
            }
        };
        self.memory().apply_read(target, &bytes).map(|_| ())
    }

    fn levels(&self) -> Vec<u32> {
        self.memory().levels()
    }

    fn read_plan(&self, level: u32) -> Vec<ReadTarget> {
        self.memory().read_plan(level)
    }

    fn start_poller(self: &Arc<Self>) -> Result<()> {
        let target: Arc<dyn PollTarget> = Arc::new(SessionTarget(Arc::downgrade(self)));
        self.poller.start(target)
    }
}

/// Poll target that does not keep a dropped session alive.
struct SessionTarget(Weak<Shared>);

impl SessionTarget {
    fn session(&self) -> Result<Arc<Shared>> {
        self.0
            .upgrade()
            .ok_or_else(|| MewtocolError::connection_lost("client dropped"))
    }
}

#[async_trait]
impl PollTarget for SessionTarget {
    fn levels(&self) -> Vec<u32> {
        self.session().map(|s| s.levels()).unwrap_or_default()
    }

    fn read_plan(&self, level: u32) -> Vec<ReadTarget> {
        self.session()
            .map(|s| s.read_plan(level))
            .unwrap_or_default()
    }

    async fn read_target(&self, target: &ReadTarget) -> Result<()> {
        self.session()?.read_target(target).await
    }

    async fn heartbeat(&self) -> Result<()> {
        self.session()?.status().await.map(|_| ())
    }

    async fn on_fault(&self, error: MewtocolError) {
        if let Ok(session) = self.session() {
            session.teardown(error.to_string()).await;
        }
    }
}

/// MEWTOCOL client for Panasonic PLCs.
///
/// Every command produces one request and one logical response; commands
/// from all clones of a client are queued in arrival order.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Creates a disconnected client. Registers can be declared right away.
    pub fn new(config: ClientConfig) -> Self {
        let notifier = ChangeNotifier::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                memory: Mutex::new(MemoryManager::new(config.memory.clone(), notifier)),
                poller: Poller::new(config.poller.clone()),
                config,
                link: tokio::sync::Mutex::new(Link::default()),
                connected: AtomicBool::new(false),
                plc_info: Mutex::new(None),
                counters: Mutex::new(Counters::default()),
                events,
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Opens the transport and confirms the PLC with a status request.
    ///
    /// Starts the poller unless auto polling is disabled. Connecting an
    /// open session returns the cached status.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::Timeout` or `MewtocolError::Io` if the transport cannot be opened
    /// - `MewtocolError::ConfigurationMismatch` if the PLC sends nothing back
    /// - `MewtocolError::PlcError` if the PLC rejects the status request
    pub async fn connect(&self) -> Result<PlcInfo> {
        let shared = &self.shared;
        {
            let mut link = shared.link.lock().await;
            if link.transport.is_some() {
                if let Some(info) = lock(&shared.plc_info).clone() {
                    return Ok(info);
                }
            } else {
                let transport =
                    transport::open(&shared.config.transport, shared.config.connect_timeout)
                        .await?;
                link.transport = Some(transport);
                link.needs_drain = false;
                link.in_flight = false;
            }
        }

        let info = match shared.status().await {
            Ok(info) => info,
            Err(e) => {
                if let Some(mut transport) = shared.link.lock().await.transport.take() {
                    let _ = transport.close().await;
                }
                return Err(e);
            }
        };

        shared.counters().connected_at = Some(Instant::now());
        shared.connected.store(true, Ordering::SeqCst);
        info!(plc = %info, transport = %shared.config.transport, "connected");
        let _ = shared.events.send(SessionEvent::Connected(info.clone()));

        if shared.config.auto_poll {
            shared.start_poller()?;
        }
        Ok(info)
    }

    /// Stops polling, closes the transport and clears every register value.
    ///
    /// Waits for the in-flight poll cycle to finish first.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if closing the transport fails; the session is
    /// closed either way.
    pub async fn disconnect(&self) -> Result<()> {
        let shared = &self.shared;
        shared.poller.stop().await;
        let transport = shared.link.lock().await.transport.take();
        let closed = match transport {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        };
        shared.mark_disconnected("disconnected by client".to_string(), true);
        closed
    }

    /// Whether the session is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Status captured by the last `RT` exchange.
    pub fn plc_info(&self) -> Option<PlcInfo> {
        lock(&self.shared.plc_info).clone()
    }

    /// Reads the PLC status (`RT`).
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::NotConnected` before `connect`, or any
    /// exchange error.
    pub async fn status(&self) -> Result<PlcInfo> {
        self.shared.status().await
    }

    /// Reads the extended status (`EX00RT00`) and returns its raw data.
    ///
    /// # Errors
    ///
    /// Returns any exchange error.
    pub async fn extended_status(&self) -> Result<String> {
        Ok(self.shared.exchange(&ExtendedStatusCommand).await?.data)
    }

    /// Switches the PLC between RUN and PROGRAM mode (`RM`).
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::PlcError` if the PLC refuses, typically when
    /// its mode switch is not in REMOTE.
    pub async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.shared.exchange(&ModeCommand::new(mode)).await?;
        info!(?mode, "operation mode changed");
        Ok(())
    }

    /// Reads words from `DT` or `FL` memory.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for relay classes or an out-of-range block
    /// - any exchange error
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mewtocol::{Client, ClientConfig, MemoryClass};
    ///
    /// # async fn example() -> mewtocol::Result<()> {
    /// let client = Client::new(ClientConfig::tcp("192.168.1.5").with_auto_poll(false));
    /// client.connect().await?;
    /// let words = client.read_words(MemoryClass::DT, 100, 4).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_words(&self, class: MemoryClass, start: u32, count: usize) -> Result<Vec<u16>> {
        let command = ReadWordCommand::new(class, start, count)?;
        let words = self.shared.exchange(&command).await?.to_words()?;
        if words.len() != command.word_count() {
            return Err(MewtocolError::invalid_response(format!(
                "expected {} words, got {}",
                command.word_count(),
                words.len()
            )));
        }
        Ok(words)
    }

    /// Writes words to `DT` or `FL` memory and patches any register covering them.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for relay classes or an out-of-range block
    /// - any exchange error
    pub async fn write_words(&self, class: MemoryClass, start: u32, words: &[u16]) -> Result<()> {
        let command = WriteWordCommand::from_words(class, start, words)?;
        self.shared.exchange(&command).await?;
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        log_patch(self.shared.memory().apply_written_words(class, start, &bytes));
        Ok(())
    }

    /// Reads one contact of `X`, `Y` or `R` memory.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for word classes or a bit past 15
    /// - any exchange error
    pub async fn read_bit(&self, class: MemoryClass, area: u32, bit: u8) -> Result<bool> {
        let command = ReadBitCommand::new(class, area, bit)?;
        self.shared.exchange(&command).await?.to_bit()
    }

    /// Writes one contact of `Y` or `R` memory and patches registers holding it.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for word classes or a bit past 15
    /// - any exchange error
    pub async fn write_bit(&self, class: MemoryClass, area: u32, bit: u8, value: bool) -> Result<()> {
        let command = WriteBitCommand::new(class, area, bit, value)?;
        self.shared.exchange(&command).await?;
        log_patch(
            self.shared
                .memory()
                .apply_written_bit(class, area, bit, value),
        );
        Ok(())
    }

    /// Declares a register.
    ///
    /// If the session is open and auto polling is enabled, a stopped poller
    /// is started so the new register gets read.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` if the descriptor is rejected.
    pub fn register(&self, descriptor: RegisterDescriptor) -> Result<RegisterId> {
        let id = self.shared.memory().register(descriptor)?;
        self.restart_polling()?;
        Ok(id)
    }

    /// Declares several registers, all or none.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; no register is declared then.
    pub fn register_all(
        &self,
        descriptors: impl IntoIterator<Item = RegisterDescriptor>,
    ) -> Result<Vec<RegisterId>> {
        let ids = self.shared.memory().register_all(descriptors)?;
        self.restart_polling()?;
        Ok(ids)
    }

    fn restart_polling(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.config.auto_poll
            && self.is_connected()
            && shared.poller.state() == PollState::Stopped
        {
            shared.start_poller()?;
        }
        Ok(())
    }

    /// Attaches a callback run with every new value of `id`.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidParameter` for an unknown id.
    pub fn bind(&self, id: RegisterId, binding: Binding) -> Result<()> {
        self.shared.memory().bind(id, binding)
    }

    /// Current value of a register, `None` until first read.
    pub fn value(&self, id: RegisterId) -> Option<PlcValue> {
        self.shared.memory().value(id).cloned()
    }

    /// Current value of a named register.
    pub fn value_of(&self, name: &str) -> Option<PlcValue> {
        self.shared
            .memory()
            .find(name)
            .and_then(|r| r.value().cloned())
    }

    /// Handle of a named register.
    pub fn find_register(&self, name: &str) -> Option<RegisterId> {
        self.shared.memory().find(name).map(|r| r.id())
    }

    /// Reads a register directly, bypassing the poll schedule.
    ///
    /// The bytes are also stored in the register's area, so every register
    /// sharing them is updated and notified.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidParameter` for an unknown id
    /// - any exchange or decode error
    pub async fn read_register(&self, id: RegisterId) -> Result<PlcValue> {
        let descriptor = self.descriptor(id)?;
        let key = descriptor.key();
        let class = descriptor.class;

        let bytes = match key.bit {
            Some(bit) => {
                let state = self.read_bit(class, descriptor.address, bit).await?;
                let patched = self
                    .shared
                    .memory()
                    .apply_written_bit(class, descriptor.address, bit, state);
                log_patch(patched);
                return Ok(PlcValue::Bool(state));
            }
            None if !class.is_word_addressable() => {
                let command = ReadRelayWordCommand::new(class, descriptor.address, 1)?;
                let bytes = self.shared.exchange(&command).await?.to_bytes()?;
                let &[lo, hi] = bytes.as_slice() else {
                    return Err(MewtocolError::invalid_response(format!(
                        "expected 2 bytes, got {}",
                        bytes.len()
                    )));
                };
                let patched = self.shared.memory().apply_written_relay_word(
                    class,
                    descriptor.address,
                    u16::from_le_bytes([lo, hi]),
                );
                log_patch(patched);
                bytes
            }
            None => {
                let command =
                    ReadWordCommand::new(class, descriptor.address, key.word_len() as usize)?;
                let bytes = self.shared.exchange(&command).await?.to_bytes()?;
                let patched =
                    self.shared
                        .memory()
                        .apply_written_words(class, descriptor.address, &bytes);
                log_patch(patched);
                bytes
            }
        };
        decode(&descriptor.ty, &bytes)
    }

    /// Writes a register and patches its area.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidParameter` for an unknown id
    /// - `MewtocolError::Validation` or `MewtocolError::ShapeMismatch` if the
    ///   value does not fit the declared type
    /// - any exchange error
    pub async fn write_register(&self, id: RegisterId, value: &PlcValue) -> Result<()> {
        let descriptor = self.descriptor(id)?;
        let class = descriptor.class;

        if let Some(bit) = descriptor.bit {
            let PlcValue::Bool(state) = value else {
                return Err(MewtocolError::validation(format!(
                    "{descriptor} holds a contact, got {value}"
                )));
            };
            return self.write_bit(class, descriptor.address, bit, *state).await;
        }

        let bytes = encode(&descriptor.ty, value)?;
        let patched = if class.is_word_addressable() {
            let command = WriteWordCommand::new(class, descriptor.address, &bytes)?;
            self.shared.exchange(&command).await?;
            self.shared
                .memory()
                .apply_written_words(class, descriptor.address, &bytes)
        } else {
            let &[lo, hi] = bytes.as_slice() else {
                return Err(MewtocolError::validation(format!(
                    "{descriptor} must encode to one relay word"
                )));
            };
            let word = u16::from_le_bytes([lo, hi]);
            let command = WriteRelayWordCommand::new(class, descriptor.address, &[word])?;
            self.shared.exchange(&command).await?;
            self.shared
                .memory()
                .apply_written_relay_word(class, descriptor.address, word)
        };
        log_patch(patched);
        Ok(())
    }

    fn descriptor(&self, id: RegisterId) -> Result<RegisterDescriptor> {
        self.shared
            .memory()
            .get(id)
            .map(|r| r.descriptor().clone())
            .ok_or_else(|| MewtocolError::invalid_parameter("id", format!("unknown register {id}")))
    }

    /// Reads every level once, ignoring skip policies.
    ///
    /// Useful with auto polling disabled. Failed reads do not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns the first error met; a transport fault ends the pass at once.
    pub async fn poll_once(&self) -> Result<()> {
        let shared = &self.shared;
        let mut first_error = None;
        for level in shared.levels() {
            for target in shared.read_plan(level) {
                match shared.read_target(&target).await {
                    Ok(()) => {}
                    Err(e) if e.is_transport_fault() || matches!(e, MewtocolError::NotConnected) => {
                        return Err(e)
                    }
                    Err(e) => {
                        warn!(area = %target, error = %e, "read failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Starts the poller if it is stopped.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::NotConnected` before `connect`.
    pub fn start_polling(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(MewtocolError::NotConnected);
        }
        self.shared.start_poller()
    }

    /// Stops the poller and waits for its in-flight cycle.
    pub async fn stop_polling(&self) {
        self.shared.poller.stop().await;
    }

    /// Waits until the first poll cycle after connect has completed.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::NotConnected` if polling is not running.
    pub async fn wait_first_cycle(&self) -> Result<()> {
        self.shared.poller.wait_first_cycle().await
    }

    /// Pauses polling after the in-flight cycle.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidStateTransition` if polling is stopped.
    pub async fn pause_polling(&self) -> Result<()> {
        self.shared.poller.pause().await
    }

    /// Resumes paused polling.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidStateTransition` if polling is stopped.
    pub fn resume_polling(&self) -> Result<()> {
        self.shared.poller.resume()
    }

    /// Poller state.
    pub fn poll_state(&self) -> PollState {
        self.shared.poller.state()
    }

    /// Poller counters.
    pub fn poller_stats(&self) -> PollerStats {
        self.shared.poller.stats()
    }

    /// Receives every register value change.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ValueChange> {
        self.shared.memory().notifier().subscribe()
    }

    /// Receives connect and disconnect events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Transport counters, with uptime measured from connect.
    pub fn stats(&self) -> TransportStats {
        let counters = self.shared.counters();
        let mut stats = counters.stats;
        stats.uptime = counters
            .connected_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        stats
    }

    /// Current area layout of the register memory.
    pub fn memory_layout(&self) -> Vec<AreaLayout> {
        self.shared.memory().layout()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.shared.config.transport)
            .field("connected", &self.is_connected())
            .field("poller", &self.shared.poller.state())
            .finish()
    }
}
