//! Byte transports for MEWTOCOL frames.
//!
//! A transport moves CR-terminated ASCII frames over a TCP socket or a serial
//! port. It knows nothing about checksums or commands; the session adds
//! timeouts around every call and decides what a failure means.
//!
//! # Design
//!
//! - **Protocol agnostic** - only frames of bytes ending in CR
//! - **Cancellation safe** - bytes read before a timeout stay buffered until
//!   [`Transport::drain`] discards them
//! - **One implementation** - [`StreamTransport`] wraps any tokio byte stream
//!
//! # Constants
//!
//! - [`DEFAULT_TCP_PORT`] - Default MEWTOCOL TCP port (9094)
//! - [`DEFAULT_TIMEOUT`] - Default exchange timeout (2 seconds)
//! - [`BAUD_RATE_CANDIDATES`] - Baud rates Panasonic CPUs support, fastest first
//!
//! # Example
//!
//! ```no_run
//! use mewtocol::transport::{open, TransportConfig, DEFAULT_TIMEOUT};
//!
//! # async fn example() -> mewtocol::Result<()> {
//! let mut transport = open(&TransportConfig::tcp("192.168.1.5"), DEFAULT_TIMEOUT).await?;
//! transport.send("%01#RT34\r").await?;
//! let reply = transport.read_frame().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info};

use crate::error::{MewtocolError, Result};

/// Default MEWTOCOL TCP port.
pub const DEFAULT_TCP_PORT: u16 = 9094;

/// Default timeout for one exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Baud rates supported by Panasonic CPUs, fastest first.
///
/// Exposed for callers probing serial settings; the client does not auto-baud.
pub const BAUD_RATE_CANDIDATES: [u32; 7] = [115_200, 57_600, 38_400, 19_200, 9_600, 4_800, 2_400];

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Longest frame accepted before a terminator must appear.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Read window used to discard late bytes.
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// Chunk size for socket reads.
const READ_CHUNK: usize = 512;

/// Frame-level byte transport.
#[async_trait]
pub trait Transport: Send {
    /// Writes one complete frame.
    async fn send(&mut self, frame: &str) -> Result<()>;

    /// Reads up to and including the next CR.
    ///
    /// Cancellation safe: bytes of an unfinished frame stay buffered.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::ConnectionLost` if the peer closed the stream
    /// - `MewtocolError::InvalidResponse` for oversized or non-ASCII frames
    /// - `MewtocolError::Io` for socket or port failures
    async fn read_frame(&mut self) -> Result<String>;

    /// Discards buffered and late bytes, returning how many were dropped.
    async fn drain(&mut self) -> Result<usize>;

    /// Closes the underlying stream.
    async fn close(&mut self) -> Result<()>;

    /// Bytes received since the last [`Transport::send`].
    fn received_since_send(&self) -> usize;

    /// Human readable peer description.
    fn describe(&self) -> String;
}

/// Transport selection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// MEWTOCOL over TCP.
    Tcp {
        /// `host:port` of the PLC or its Ethernet unit.
        addr: String,
    },
    /// MEWTOCOL over a serial port.
    Serial(SerialConfig),
}

impl TransportConfig {
    /// TCP transport; [`DEFAULT_TCP_PORT`] is used when `addr` has no port.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::transport::TransportConfig;
    ///
    /// assert_eq!(
    ///     TransportConfig::tcp("10.0.0.2"),
    ///     TransportConfig::Tcp { addr: "10.0.0.2:9094".into() }
    /// );
    /// assert_eq!(
    ///     TransportConfig::tcp("10.0.0.2:502"),
    ///     TransportConfig::Tcp { addr: "10.0.0.2:502".into() }
    /// );
    /// ```
    pub fn tcp(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let has_port = addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if has_port {
            TransportConfig::Tcp { addr }
        } else {
            TransportConfig::Tcp {
                addr: format!("{addr}:{DEFAULT_TCP_PORT}"),
            }
        }
    }

    /// Serial transport with default 8-O-1 framing.
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        TransportConfig::Serial(SerialConfig::new(port, baud_rate))
    }
}

impl std::fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConfig::Tcp { addr } => write!(f, "tcp://{addr}"),
            TransportConfig::Serial(serial) => write!(f, "{serial}"),
        }
    }
}

/// Serial port settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    /// Device path (`/dev/ttyUSB0`, `COM3`).
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
}

impl SerialConfig {
    /// Creates settings with 8 data bits, odd parity and 1 stop bit.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::Odd,
            stop_bits: StopBits::One,
        }
    }

    /// Sets the data bits.
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Sets the parity.
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the stop bits.
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

impl std::fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{} {}-{data}{parity}{stop}", self.port, self.baud_rate)
    }
}

/// Frame transport over any tokio byte stream.
pub struct StreamTransport<S> {
    stream: Option<S>,
    peer: String,
    buffer: Vec<u8>,
    received_since_send: usize,
}

/// Transport over a TCP socket.
pub type TcpTransport = StreamTransport<TcpStream>;

/// Transport over a serial port.
pub type SerialTransport = StreamTransport<SerialStream>;

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an open stream.
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
            buffer: Vec::with_capacity(READ_CHUNK),
            received_since_send: 0,
        }
    }

    fn stream(&mut self) -> Result<&mut S> {
        self.stream
            .as_mut()
            .ok_or_else(|| MewtocolError::connection_lost("transport closed"))
    }

    fn take_frame(&mut self) -> Result<Option<String>> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\r') else {
            if self.buffer.len() > MAX_FRAME_SIZE {
                self.buffer.clear();
                return Err(MewtocolError::invalid_response(format!(
                    "no terminator within {MAX_FRAME_SIZE} bytes"
                )));
            }
            return Ok(None);
        };
        let frame: Vec<u8> = self.buffer.drain(..=pos).collect();
        String::from_utf8(frame)
            .map(Some)
            .map_err(|_| MewtocolError::invalid_response("frame is not ASCII"))
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &str) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(frame.as_bytes()).await?;
        stream.flush().await?;
        self.received_since_send = 0;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<String> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }
            let n = self.stream()?.read(&mut chunk).await?;
            if n == 0 {
                return Err(MewtocolError::connection_lost(format!(
                    "{} closed the connection",
                    self.peer
                )));
            }
            self.received_since_send += n;
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn drain(&mut self) -> Result<usize> {
        let mut dropped = self.buffer.len();
        self.buffer.clear();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let stream = self.stream()?;
            match timeout(DRAIN_WINDOW, stream.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    return Err(MewtocolError::connection_lost(format!(
                        "{} closed the connection",
                        self.peer
                    )))
                }
                Ok(Ok(n)) => dropped += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        if dropped > 0 {
            debug!(peer = %self.peer, dropped, "discarded stale bytes");
        }
        Ok(dropped)
    }

    async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        if let Some(mut stream) = self.stream.take() {
            // the peer may already be gone
            let _ = stream.shutdown().await;
            info!(peer = %self.peer, "transport closed");
        }
        Ok(())
    }

    fn received_since_send(&self) -> usize {
        self.received_since_send
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

/// Opens the configured transport.
///
/// # Errors
///
/// - `MewtocolError::Timeout` if the TCP connect does not finish within `connect_timeout`
/// - `MewtocolError::Io` if the socket cannot be opened
/// - `MewtocolError::ConnectionLost` if the serial port cannot be opened
pub async fn open(config: &TransportConfig, connect_timeout: Duration) -> Result<Box<dyn Transport>> {
    match config {
        TransportConfig::Tcp { addr } => {
            let stream = timeout(connect_timeout, TcpStream::connect(addr.as_str()))
                .await
                .map_err(|_| MewtocolError::Timeout)??;
            stream.set_nodelay(true)?;
            info!(peer = %addr, "TCP transport connected");
            Ok(Box::new(TcpTransport::new(stream, addr.clone())))
        }
        TransportConfig::Serial(serial) => {
            let builder = tokio_serial::new(&serial.port, serial.baud_rate)
                .data_bits(serial.data_bits)
                .parity(serial.parity)
                .stop_bits(serial.stop_bits)
                .timeout(connect_timeout);
            let stream = SerialStream::open(&builder).map_err(|e| {
                MewtocolError::connection_lost(format!("failed to open {}: {e}", serial.port))
            })?;
            info!(port = %serial, "serial transport opened");
            Ok(Box::new(SerialTransport::new(stream, serial.to_string())))
        }
    }
}

/// Byte and frame counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransportStats {
    /// Bytes written.
    pub bytes_sent: u64,
    /// Bytes read.
    pub bytes_received: u64,
    /// Frames written, continuation requests included.
    pub frames_sent: u64,
    /// Frames read.
    pub frames_received: u64,
    /// Exchanges that timed out.
    pub timeouts: u64,
    /// Exchanges that failed for any other reason.
    pub errors: u64,
    /// Time the session has been connected.
    pub uptime: Duration,
}

impl TransportStats {
    /// Average bytes per second in both directions since connect.
    pub fn throughput(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            (self.bytes_sent + self.bytes_received) as f64 / secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_default_serial_framing() {
        let serial = SerialConfig::new("/dev/ttyUSB0", 9600);
        assert_eq!(serial.to_string(), "/dev/ttyUSB0 9600-8O1");
        let even = serial.with_parity(Parity::Even).with_data_bits(DataBits::Seven);
        assert_eq!(even.to_string(), "/dev/ttyUSB0 9600-7E1");
    }

    #[test]
    fn test_baud_candidates_fastest_first() {
        assert_eq!(BAUD_RATE_CANDIDATES[0], 115_200);
        assert!(BAUD_RATE_CANDIDATES.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_throughput() {
        let stats = TransportStats {
            bytes_sent: 100,
            bytes_received: 300,
            uptime: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.throughput(), 200.0);
        assert_eq!(TransportStats::default().throughput(), 0.0);
    }

    #[tokio::test]
    async fn test_reads_split_frames() {
        let (client, mut plc) = duplex(64);
        let mut transport = StreamTransport::new(client, "mock");

        plc.write_all(b"%01$RC").await.unwrap();
        plc.write_all(b"114\r%01$").await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap(), "%01$RC114\r");
        assert_eq!(transport.received_since_send(), 14);

        transport.send("%01#RT\r").await.unwrap();
        assert_eq!(transport.received_since_send(), 0);
        let mut sent = [0u8; 7];
        plc.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"%01#RT\r");
    }

    #[tokio::test]
    async fn test_drain_discards_partial_frames() {
        let (client, mut plc) = duplex(64);
        let mut transport = StreamTransport::new(client, "mock");
        plc.write_all(b"%01$RD00").await.unwrap();
        assert_eq!(transport.drain().await.unwrap(), 8);

        plc.write_all(b"%01$RT\r").await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap(), "%01$RT\r");
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_lost() {
        let (client, plc) = duplex(64);
        let mut transport = StreamTransport::new(client, "mock");
        drop(plc);
        let err = transport.read_frame().await.unwrap_err();
        assert!(err.is_transport_fault());
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_io() {
        let (client, _plc) = duplex(64);
        let mut transport = StreamTransport::new(client, "mock");
        transport.close().await.unwrap();
        assert!(transport.send("%01#RT\r").await.is_err());
    }
}
