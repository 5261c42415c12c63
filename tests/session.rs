//! Session tests against a scripted PLC on a local TCP socket.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mewtocol::frame::{bcc, build_frame, ChecksumKind};
use mewtocol::{
    Client, ClientConfig, MemoryClass, MewtocolError, PlcType, PlcValue, PollState,
    RegisterDescriptor, SessionEvent,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Word address the mock never answers.
const SILENT_ADDRESS: u32 = 500;
/// Word address that makes the mock hang up.
const HANG_UP_ADDRESS: u32 = 9999;
/// Word address answered with a frame that never ends.
const PARTIAL_ADDRESS: u32 = 700;
/// Word address answered after [`LATE_REPLY_DELAY`].
const LATE_ADDRESS: u32 = 600;
const LATE_REPLY_DELAY: Duration = Duration::from_millis(100);
/// Responses with more words than this are split in two frames.
const FRAME_SPLIT_WORDS: usize = 8;

enum Reply {
    Frames(Vec<String>),
    Late(Vec<String>),
    Silence,
    HangUp,
}

#[derive(Default)]
struct MockPlc {
    words: Mutex<BTreeMap<u32, u16>>,
    relays: Mutex<BTreeMap<u32, u16>>,
    commands: Mutex<Vec<String>>,
    // None answers every RT
    status_replies: Mutex<Option<usize>>,
    connections: AtomicUsize,
}

fn hex_words(words: impl Iterator<Item = u16>) -> String {
    words
        .map(|w| format!("{:02X}{:02X}", w & 0xFF, w >> 8))
        .collect()
}

fn parse_words(hex: &str) -> Vec<u16> {
    hex.as_bytes()
        .chunks(4)
        .map(|c| {
            let c = std::str::from_utf8(c).unwrap();
            let lo = u16::from_str_radix(&c[0..2], 16).unwrap();
            let hi = u16::from_str_radix(&c[2..4], 16).unwrap();
            lo | (hi << 8)
        })
        .collect()
}

fn reply(payload: &str) -> Reply {
    Reply::Frames(vec![build_frame(payload, ChecksumKind::Bcc)])
}

impl MockPlc {
    fn set_word(&self, address: u32, value: u16) {
        self.words.lock().unwrap().insert(address, value);
    }

    fn word(&self, address: u32) -> u16 {
        self.words.lock().unwrap().get(&address).copied().unwrap_or(0)
    }

    fn set_relay(&self, address: u32, value: u16) {
        self.relays.lock().unwrap().insert(address, value);
    }

    fn relay(&self, address: u32) -> u16 {
        self.relays.lock().unwrap().get(&address).copied().unwrap_or(0)
    }

    fn limit_status_replies(&self, limit: Option<usize>) {
        *self.status_replies.lock().unwrap() = limit;
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn respond(&self, body: &str) -> Reply {
        self.commands.lock().unwrap().push(body.to_string());
        let num = |range: std::ops::Range<usize>| body[range].parse::<u32>().unwrap();

        match &body[..2] {
            "RT" => match &mut *self.status_replies.lock().unwrap() {
                Some(0) => Reply::Silence,
                Some(left) => {
                    *left -= 1;
                    reply("%01$RT2023038100000000")
                }
                None => reply("%01$RT2023038100000000"),
            },
            "RM" => reply("%01!42"),
            "RD" => {
                let (start, end) = (num(3..8), num(8..13));
                match start {
                    SILENT_ADDRESS => return Reply::Silence,
                    HANG_UP_ADDRESS => return Reply::HangUp,
                    PARTIAL_ADDRESS => return Reply::Frames(vec!["%01$RD12".to_string()]),
                    _ => {}
                }
                let words: Vec<u16> = (start..=end).map(|a| self.word(a)).collect();
                if start == LATE_ADDRESS {
                    let payload = format!("%01$RD{}", hex_words(words.into_iter()));
                    return Reply::Late(vec![build_frame(&payload, ChecksumKind::Bcc)]);
                }
                if words.len() <= FRAME_SPLIT_WORDS {
                    return reply(&format!("%01$RD{}", hex_words(words.into_iter())));
                }
                let (head, tail) = words.split_at(words.len() / 2);
                let first = format!("%01$RD{}", hex_words(head.iter().copied()));
                let second = format!("%01{}", hex_words(tail.iter().copied()));
                Reply::Frames(vec![
                    format!("{first}{:02X}&\r", bcc(&first)),
                    build_frame(&second, ChecksumKind::Bcc),
                ])
            }
            "WD" => {
                let start = num(3..8);
                for (i, word) in parse_words(&body[13..]).into_iter().enumerate() {
                    self.set_word(start + i as u32, word);
                }
                reply("%01$WD")
            }
            "RC" if &body[2..3] == "C" => {
                let (start, end) = (num(4..8), num(8..12));
                let words = (start..=end).map(|a| self.relay(a));
                reply(&format!("%01$RC{}", hex_words(words)))
            }
            "RC" => {
                let area = num(4..7);
                let bit = u8::from_str_radix(&body[7..8], 16).unwrap();
                let state = self.relay(area) >> bit & 1;
                reply(&format!("%01$RC{state}"))
            }
            "WC" if &body[2..3] == "C" => {
                let start = num(4..8);
                for (i, word) in parse_words(&body[12..]).into_iter().enumerate() {
                    self.set_relay(start + i as u32, word);
                }
                reply("%01$WC")
            }
            "WC" => {
                let area = num(4..7);
                let bit = u8::from_str_radix(&body[7..8], 16).unwrap();
                let word = self.relay(area) & !(1 << bit);
                let set = u16::from(&body[8..9] == "1") << bit;
                self.set_relay(area, word | set);
                reply("%01$WC")
            }
            _ => reply("%01!41"),
        }
    }
}

async fn serve_connection(socket: TcpStream, plc: Arc<MockPlc>) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<String> = Vec::new();
    loop {
        let mut raw = Vec::new();
        match reader.read_until(b'\r', &mut raw).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let frame = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
        if frame.ends_with("**&") {
            if !pending.is_empty() {
                let next = pending.remove(0);
                writer.write_all(next.as_bytes()).await.unwrap();
            }
            continue;
        }
        // "%EE#" ... checksum
        let body = &frame[4..frame.len() - 2];
        match plc.respond(body) {
            Reply::Frames(mut frames) => {
                let first = frames.remove(0);
                pending = frames;
                writer.write_all(first.as_bytes()).await.unwrap();
            }
            Reply::Late(mut frames) => {
                tokio::time::sleep(LATE_REPLY_DELAY).await;
                let first = frames.remove(0);
                pending = frames;
                if writer.write_all(first.as_bytes()).await.is_err() {
                    return;
                }
            }
            Reply::Silence => {}
            Reply::HangUp => return,
        }
    }
}

async fn start_plc() -> (Arc<MockPlc>, String) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let plc = Arc::new(MockPlc::default());
    let served = plc.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            served.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(socket, served.clone()));
        }
    });
    (plc, addr)
}

fn config(addr: &str) -> ClientConfig {
    ClientConfig::tcp(addr)
        .with_timeout(Duration::from_millis(200))
        .with_frame_logging(true)
}

#[tokio::test]
async fn test_connect_reads_status_and_reports_events() {
    let (_plc, addr) = start_plc().await;
    let client = Client::new(config(&addr).with_auto_poll(false));
    let mut events = client.subscribe_events();

    let info = client.connect().await.unwrap();
    assert_eq!(info.cpu_type, 0x20);
    assert_eq!(info.version, "2.3");
    assert!(info.is_run_mode());
    assert!(client.is_connected());
    assert_eq!(client.plc_info(), Some(info.clone()));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Connected(info));

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Disconnected { .. }
    ));
}

#[tokio::test]
async fn test_nearby_registers_are_read_in_one_request() {
    let (plc, addr) = start_plc().await;
    plc.set_word(100, 0xFFFE);
    plc.set_word(105, 7);

    let client = Client::new(config(&addr));
    let speed = client
        .register(RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::Int).with_name("speed"))
        .unwrap();
    let state = client
        .register(RegisterDescriptor::new(MemoryClass::DT, 105, PlcType::Word))
        .unwrap();

    let layout = client.memory_layout();
    assert_eq!(layout.len(), 1);
    assert_eq!((layout[0].start, layout[0].end), (100, 105));

    client.connect().await.unwrap();
    client.wait_first_cycle().await.unwrap();
    assert_eq!(client.value(speed), Some(PlcValue::Int(-2)));
    assert_eq!(client.value_of("speed"), Some(PlcValue::Int(-2)));
    assert_eq!(client.value(state), Some(PlcValue::Word(7)));

    assert!(plc.count("RDD0010000105") >= 1);
    assert_eq!(plc.count("RD"), plc.count("RDD0010000105"));
    assert!(client.poller_stats().cycles >= 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_writing_same_value_twice_notifies_once() {
    let (plc, addr) = start_plc().await;
    let client = Client::new(config(&addr).with_auto_poll(false));
    let total = client
        .register(RegisterDescriptor::new(MemoryClass::DT, 200, PlcType::DInt))
        .unwrap();
    client.connect().await.unwrap();
    let mut changes = client.subscribe_changes();

    client.write_register(total, &PlcValue::DInt(70_000)).await.unwrap();
    client.write_register(total, &PlcValue::DInt(70_000)).await.unwrap();

    let change = changes.try_recv().unwrap();
    assert_eq!(change.id, total);
    assert_eq!(change.old, None);
    assert_eq!(change.new, Some(PlcValue::DInt(70_000)));
    assert!(changes.try_recv().is_err());

    // 0x0001_1170 travels high word first
    assert_eq!(plc.word(200), 0x0001);
    assert_eq!(plc.word(201), 0x1170);
    assert_eq!(
        client.read_register(total).await.unwrap(),
        PlcValue::DInt(70_000)
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_plc_error_keeps_session_open() {
    let (_plc, addr) = start_plc().await;
    let client = Client::new(config(&addr).with_auto_poll(false));
    client.connect().await.unwrap();

    let err = client
        .set_operation_mode(mewtocol::OperationMode::Run)
        .await
        .unwrap_err();
    match err {
        MewtocolError::PlcError { code, .. } => assert_eq!(code, 42),
        other => panic!("unexpected error: {other}"),
    }
    assert!(client.is_connected());
    assert!(client.status().await.is_ok());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_silence_and_partial_replies_keep_session_open() {
    let (plc, addr) = start_plc().await;
    plc.set_word(100, 42);
    let client = Client::new(config(&addr).with_auto_poll(false));
    client.connect().await.unwrap();

    let err = client
        .read_words(MemoryClass::DT, SILENT_ADDRESS, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MewtocolError::ConfigurationMismatch));
    assert!(client.is_connected());
    assert_eq!(client.stats().timeouts, 1);

    let err = client
        .read_words(MemoryClass::DT, PARTIAL_ADDRESS, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MewtocolError::Timeout));
    assert!(client.is_connected());
    assert_eq!(client.stats().timeouts, 2);

    assert_eq!(
        client.read_words(MemoryClass::DT, 100, 1).await.unwrap(),
        vec![42]
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_multi_frame_response_is_reassembled() {
    let (plc, addr) = start_plc().await;
    for i in 0..20 {
        plc.set_word(1000 + i, i as u16 * 3);
    }
    let client = Client::new(config(&addr).with_auto_poll(false));
    client.connect().await.unwrap();

    let words = client.read_words(MemoryClass::DT, 1000, 20).await.unwrap();
    assert_eq!(words, (0..20).map(|i| i * 3).collect::<Vec<u16>>());

    // RT, then two frames for the RD
    let stats = client.stats();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.frames_sent, 3);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_peer_hang_up_tears_session_down() {
    let (plc, addr) = start_plc().await;
    plc.set_word(100, 5);
    let client = Client::new(config(&addr).with_auto_poll(false));
    let id = client
        .register(RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::Word))
        .unwrap();
    client.connect().await.unwrap();
    client.poll_once().await.unwrap();
    assert_eq!(client.value(id), Some(PlcValue::Word(5)));

    let mut events = client.subscribe_events();
    let err = client
        .read_words(MemoryClass::DT, HANG_UP_ADDRESS, 1)
        .await
        .unwrap_err();
    assert!(err.is_transport_fault());
    assert!(!client.is_connected());
    assert_eq!(client.value(id), None);
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Disconnected { .. }
    ));
    assert!(matches!(
        client.status().await.unwrap_err(),
        MewtocolError::NotConnected
    ));
}

#[tokio::test]
async fn test_relay_contacts_follow_writes() {
    let (plc, addr) = start_plc().await;
    plc.set_relay(10, 0x0800);
    let client = Client::new(config(&addr).with_auto_poll(false));
    let lamp = client
        .register(RegisterDescriptor::bit(MemoryClass::R, 10, 0xB).with_name("lamp"))
        .unwrap();
    let neighbour = client
        .register(RegisterDescriptor::bit(MemoryClass::R, 10, 0))
        .unwrap();
    client.connect().await.unwrap();

    client.poll_once().await.unwrap();
    assert_eq!(client.value(lamp), Some(PlcValue::Bool(true)));
    assert_eq!(client.value(neighbour), Some(PlcValue::Bool(false)));

    client.write_register(lamp, &PlcValue::Bool(false)).await.unwrap();
    assert_eq!(plc.relay(10), 0);
    assert_eq!(client.value(lamp), Some(PlcValue::Bool(false)));
    assert!(!client.read_bit(MemoryClass::R, 10, 0xB).await.unwrap());

    client.write_bit(MemoryClass::R, 10, 0, true).await.unwrap();
    assert_eq!(plc.relay(10), 1);
    assert_eq!(client.value(neighbour), Some(PlcValue::Bool(true)));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_stops_polling_and_clears_values() {
    let (plc, addr) = start_plc().await;
    plc.set_word(300, 11);
    let client = Client::new(config(&addr));
    let id = client
        .register(RegisterDescriptor::new(MemoryClass::DT, 300, PlcType::Word))
        .unwrap();
    client.connect().await.unwrap();
    client.wait_first_cycle().await.unwrap();
    assert_eq!(client.poll_state(), PollState::Running);
    assert_eq!(client.value(id), Some(PlcValue::Word(11)));

    client.pause_polling().await.unwrap();
    assert_eq!(client.poll_state(), PollState::Paused);
    client.resume_polling().unwrap();

    client.disconnect().await.unwrap();
    assert_eq!(client.poll_state(), PollState::Stopped);
    assert_eq!(client.value(id), None);
}

#[tokio::test]
async fn test_cancelled_command_does_not_shift_later_replies() {
    let (plc, addr) = start_plc().await;
    plc.set_word(LATE_ADDRESS, 0x1111);
    plc.set_word(LATE_ADDRESS + 1, 0x2222);
    let client = Client::new(config(&addr).with_auto_poll(false));
    client.connect().await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        client.read_words(MemoryClass::DT, LATE_ADDRESS, 1),
    )
    .await;
    assert!(abandoned.is_err());

    assert_eq!(
        client
            .read_words(MemoryClass::DT, LATE_ADDRESS + 1, 1)
            .await
            .unwrap(),
        vec![0x2222]
    );
    assert_eq!(
        client.read_words(MemoryClass::DT, LATE_ADDRESS, 2).await.unwrap(),
        vec![0x1111, 0x2222]
    );
    assert!(client.is_connected());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_failure_closes_transport() {
    let (plc, addr) = start_plc().await;
    plc.set_word(100, 0x2222);
    plc.limit_status_replies(Some(1));
    let client = Client::new(config(&addr));
    client
        .register(RegisterDescriptor::new(MemoryClass::DT, 100, PlcType::Word))
        .unwrap();
    let mut events = client.subscribe_events();

    client.connect().await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Connected(_)
    ));
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, SessionEvent::Disconnected { .. }));
    assert!(!client.is_connected());
    assert!(matches!(
        client.read_words(MemoryClass::DT, 100, 1).await.unwrap_err(),
        MewtocolError::NotConnected
    ));

    // reconnecting opens a new socket
    plc.limit_status_replies(None);
    client.connect().await.unwrap();
    assert_eq!(plc.connections(), 2);
    assert_eq!(
        client.read_words(MemoryClass::DT, 100, 1).await.unwrap(),
        vec![0x2222]
    );

    client.disconnect().await.unwrap();
}
