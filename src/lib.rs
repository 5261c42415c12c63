//! # MEWTOCOL Client Library
//!
//! A Rust library for talking to Panasonic PLCs with the MEWTOCOL-COM
//! protocol over TCP or serial lines.
//!
//! Beyond single commands, the client keeps a set of declared registers
//! synchronized: registers are merged into a few contiguous memory areas per
//! poll level, a background poller reads those areas, and every value change
//! is reported to subscribers.
//!
//! ## Features
//!
//! - **Async** — built on tokio, one FIFO command queue per session
//! - **Area merging** — nearby registers share one `RD` request
//! - **Poll levels** — every level has its own cadence
//! - **Typed values** — INT, DINT, REAL, TIME, bit vectors, strings and arrays
//! - **No panics** — all errors returned as `Result<T, MewtocolError>`
//! - **Utility functions** — bit manipulation and formatting helpers
//!
//! ## Quick Start
//!
//! ```no_run
//! use mewtocol::{Client, ClientConfig, MemoryClass, PlcType, RegisterDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> mewtocol::Result<()> {
//!     let client = Client::new(ClientConfig::tcp("192.168.1.5"));
//!
//!     // DT100 and DT102 end up in one area
//!     let speed = client.register(
//!         RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::Int).with_name("speed"),
//!     )?;
//!     let total = client.register(RegisterDescriptor::new(MemoryClass::DT, 102, PlcType::DInt))?;
//!
//!     // R10 contact B, refreshed every fourth cycle
//!     let lamp = client.register(RegisterDescriptor::bit(MemoryClass::R, 10, 0xB).with_poll_level(4))?;
//!
//!     let info = client.connect().await?;
//!     println!("connected to {info}");
//!
//!     client.wait_first_cycle().await?;
//!     println!("speed={:?} total={:?} lamp={:?}",
//!         client.value(speed), client.value(total), client.value(lamp));
//!
//!     client.disconnect().await
//! }
//! ```
//!
//! ## Memory Classes
//!
//! | Class | Description | Word Access | Bit Access |
//! |-------|-------------|:-----------:|:----------:|
//! | [`MemoryClass::X`] | External inputs | ✓ (`RCC`) | ✓ |
//! | [`MemoryClass::Y`] | External outputs | ✓ (`RCC`/`WCC`) | ✓ |
//! | [`MemoryClass::R`] | Internal relays | ✓ (`RCC`/`WCC`) | ✓ |
//! | [`MemoryClass::DT`] | Data registers | ✓ | ✗ |
//! | [`MemoryClass::FL`] | File registers | ✓ | ✗ |
//!
//! ## Change Notifications
//!
//! ```no_run
//! # use mewtocol::{Client, ClientConfig, MemoryClass, PlcType, PlcValue, RegisterDescriptor};
//! # async fn example() -> mewtocol::Result<()> {
//! # let client = Client::new(ClientConfig::tcp("192.168.1.5"));
//! let id = client.register(RegisterDescriptor::new(MemoryClass::DT, 7, PlcType::Word))?;
//! client.bind(id, Box::new(|value: Option<&PlcValue>| println!("DT7 is now {value:?}")))?;
//!
//! let mut changes = client.subscribe_changes();
//! client.connect().await?;
//! while let Ok(change) = changes.recv().await {
//!     println!("{}: {:?} -> {:?}", change.key, change.old, change.new);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! use mewtocol::{Client, ClientConfig, MemoryClass, MewtocolError};
//!
//! # async fn example(client: Client) {
//! match client.read_words(MemoryClass::DT, 100, 10).await {
//!     Ok(words) => println!("Data: {:?}", words),
//!     Err(MewtocolError::Timeout) => println!("Communication timeout"),
//!     Err(MewtocolError::PlcError { code, description }) => {
//!         println!("PLC error {code}: {description}");
//!     }
//!     Err(e) if e.is_transport_fault() => println!("Session lost: {e}"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```no_run
//! use mewtocol::poller::{PollerConfig, SkipPolicy};
//! use mewtocol::{ClientConfig, MemoryConfig, Station};
//! use std::time::Duration;
//!
//! let config = ClientConfig::serial("/dev/ttyUSB0", 19_200)
//!     .with_station(Station::new(1)?)                  // default: any station (EE)
//!     .with_timeout(Duration::from_millis(500))         // default: 2s
//!     .with_memory_config(MemoryConfig::default().with_max_optimization_distance(16))
//!     .with_poller_config(
//!         PollerConfig::default()
//!             .with_level_policy(2, SkipPolicy::MinInterval(Duration::from_secs(1)))
//!             .with_level_policy(9, SkipPolicy::OnDemand),
//!     );
//! # Ok::<(), mewtocol::MewtocolError>(())
//! ```
//!
//! ## Logging
//!
//! The library logs through `tracing` and never installs a subscriber.
//! Frame traffic is logged at debug level when
//! [`ClientConfig::frame_logging`] is set.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod area;
mod client;
pub mod codec;
pub mod command;
mod error;
pub mod frame;
mod manager;
mod memory;
pub mod poller;
mod register;
mod response;
pub mod status;
pub mod transport;
pub mod utils;

// Public re-exports
pub use area::{AreaId, AreaLayout};
pub use client::{Client, ClientConfig, SessionEvent};
pub use codec::{decode, encode, BitVector, PlcArray, PlcType, PlcValue};
pub use command::OperationMode;
pub use error::{error_code_description, MewtocolError, Result};
pub use frame::{ChecksumKind, Station};
pub use manager::{LevelMergePolicy, MemoryConfig, MemoryManager, ReadTarget};
pub use memory::{MemoryClass, MAX_WORD_ADDRESS};
pub use poller::{PollState, Poller, PollerConfig, PollerStats, SkipPolicy};
pub use register::{
    Binding, ChangeNotifier, Register, RegisterDescriptor, RegisterId, RegisterKey, ValueChange,
};
pub use response::MewtocolResponse;
pub use status::PlcInfo;
pub use transport::{TransportConfig, TransportStats, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT};
