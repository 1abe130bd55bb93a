//! End-to-end tests against an in-process fake module behind a TCP socket.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use xbridge_engine::{
    DialogStep, EngineError, NegotiationPlan, ProvisionPlan, ProvisionStep, ResponseStatus,
    Supervisor, SupervisorConfig, TxStatus,
};
use xbridge_frame::{api, encode, Address64, Frame, Inbound, StreamReassembler};
use xbridge_transport::Endpoint;

const NODE: Address64 = Address64(0x0013_A200_4000_0002);

/// `ATSL` is answered this late, on its own thread.
const SLOW_REPLY: Duration = Duration::from_millis(1000);

#[derive(Default)]
struct ModuleState {
    api_mode: u8,
    params: HashMap<String, Vec<u8>>,
    /// Every command and frame seen, in arrival order.
    log: Vec<String>,
    connections: usize,
}

/// Answers the subset of the module protocol the engine uses.
#[derive(Clone)]
struct FakeModule {
    port: u16,
    state: Arc<Mutex<ModuleState>>,
}

impl FakeModule {
    fn spawn(api_mode: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut params = HashMap::new();
        params.insert("MY".to_string(), vec![0xFF, 0xFE]);
        params.insert("ID".to_string(), vec![0x33, 0x32]);
        params.insert("WR".to_string(), Vec::new());
        params.insert("SL".to_string(), vec![0x40, 0x00, 0x00, 0x01]);
        let module = Self {
            port,
            state: Arc::new(Mutex::new(ModuleState {
                api_mode,
                params,
                ..ModuleState::default()
            })),
        };

        let server = module.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                server.state.lock().unwrap().connections += 1;
                server.serve(stream);
            }
        });
        module
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    fn param(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().params.get(name).cloned()
    }

    fn serve(&self, mut stream: TcpStream) {
        let mut reassembler = StreamReassembler::new();
        let mut text = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for inbound in reassembler.feed(&buf[..n], Instant::now()) {
                let reply = match inbound {
                    Inbound::Text(bytes) => {
                        text.extend_from_slice(&bytes);
                        self.answer_text(&mut text)
                    }
                    Inbound::Frame(frame) => match self.answer_frame(&frame) {
                        Some(reply) if is_slow(&frame) => {
                            let Ok(mut late) = stream.try_clone() else { return };
                            thread::spawn(move || {
                                thread::sleep(SLOW_REPLY);
                                let _ = late.write_all(&reply);
                            });
                            Vec::new()
                        }
                        Some(reply) => reply,
                        None => {
                            let _ = stream.shutdown(Shutdown::Both);
                            return;
                        }
                    },
                    Inbound::ModemStatus(_) => Vec::new(),
                };
                if stream.write_all(&reply).is_err() {
                    return;
                }
            }
        }
    }

    fn answer_text(&self, text: &mut Vec<u8>) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            if text.starts_with(b"+++") {
                text.drain(..3);
                self.state.lock().unwrap().log.push("+++".into());
                out.extend_from_slice(b"OK\r");
                continue;
            }
            let Some(end) = text.iter().position(|&b| b == b'\r') else {
                break;
            };
            let line: Vec<u8> = text.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line).into_owned();

            let mut state = self.state.lock().unwrap();
            state.log.push(command.clone());
            let reply = match command.as_str() {
                "ATAP\r" => format!("{}\r", state.api_mode),
                "ATAP2\r" => {
                    state.api_mode = 2;
                    "OK\r".to_string()
                }
                "ATVR\r" => "10E8\r".to_string(),
                "ATND\r" => "0001\r0013A200\r40000002\r\r\r".to_string(),
                _ => "OK\r".to_string(),
            };
            out.extend_from_slice(reply.as_bytes());
        }
        out
    }

    /// `None` means hang up.
    fn answer_frame(&self, frame: &Frame) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let id = frame.frame_id.unwrap_or(0);
        state
            .log
            .push(format!("{}:{id}", api::api_name(frame.api_id)));

        let reply = match frame.api_id {
            api::AT_COMMAND => {
                let name = String::from_utf8_lossy(&frame.payload[..2]).into_owned();
                let mut payload = frame.payload[..2].to_vec();
                if frame.payload.len() > 2 {
                    state.params.insert(name, frame.payload[2..].to_vec());
                    payload.push(0x00);
                } else if let Some(value) = state.params.get(&name) {
                    payload.push(0x00);
                    payload.extend_from_slice(value);
                } else {
                    payload.push(0x02);
                }
                encode(api::AT_RESPONSE, Some(id), &payload).unwrap().to_vec()
            }
            api::TX_REQUEST_64 => {
                let data = &frame.payload[9..];
                if data == b"hangup" {
                    return None;
                }
                let status = if data == b"drop" { 0x01 } else { 0x00 };
                let mut out = encode(api::TX_STATUS, Some(id), &[status]).unwrap().to_vec();
                // Echo the data back as if the node answered.
                let mut rx = frame.payload[..8].to_vec();
                rx.extend_from_slice(&[0x28, 0x00]);
                rx.extend_from_slice(data);
                out.extend_from_slice(&encode(api::RX_PACKET_64, None, &rx).unwrap());
                if data == b"sample" {
                    // One IO sample from the same node: 1 sample, D0 enabled, D0 high.
                    let mut io = frame.payload[..8].to_vec();
                    io.extend_from_slice(&[0x28, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01]);
                    out.extend_from_slice(&encode(api::RX_IO_64, None, &io).unwrap());
                }
                out
            }
            api::REMOTE_AT_COMMAND if id != 0 => {
                let mut payload = frame.payload[..8].to_vec();
                payload.extend_from_slice(&[0x12, 0x34]);
                payload.extend_from_slice(&frame.payload[11..13]);
                payload.extend_from_slice(&[0x00, 0x05]);
                encode(api::REMOTE_AT_RESPONSE, Some(id), &payload)
                    .unwrap()
                    .to_vec()
            }
            _ => Vec::new(),
        };
        Some(reply)
    }
}

fn is_slow(frame: &Frame) -> bool {
    frame.api_id == api::AT_COMMAND && frame.payload.starts_with(b"SL")
}

fn config_for(module: &FakeModule) -> SupervisorConfig {
    SupervisorConfig {
        endpoint: Endpoint::tcp("127.0.0.1", module.port),
        resync_pause: Duration::from_millis(10),
        reconnect_backoff: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        response_timeout: Duration::from_secs(2),
        remote_response_timeout: Duration::from_secs(2),
        pre_escape_wait: Duration::from_millis(10),
        guard_time: Duration::from_millis(10),
        dialog_timeout: Duration::from_secs(2),
        read_tick: Duration::from_millis(20),
        ..SupervisorConfig::default()
    }
}

fn ready(module: &FakeModule) -> Supervisor {
    let supervisor = Supervisor::spawn(config_for(module)).unwrap();
    supervisor.wait_ready(Duration::from_secs(10)).unwrap();
    supervisor
}

#[test]
fn configured_module_only_gets_probed() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    let log = module.log();
    assert!(log.contains(&"ATAP\r".to_string()));
    assert!(!log.contains(&"ATAP2\r".to_string()));

    let my = supervisor.local_at_query(b"MY").unwrap();
    assert_eq!(my.as_ref(), &[0xFF, 0xFE]);
}

#[test]
fn unconfigured_module_is_switched_to_api_mode() {
    let module = FakeModule::spawn(0);
    let _supervisor = ready(&module);

    let log: Vec<String> = module
        .log()
        .into_iter()
        .filter(|entry| entry.starts_with("AT") && entry != "ATCN\r")
        .collect();
    assert_eq!(log, vec!["ATAP\r", "ATAP2\r", "ATWR\r", "ATAC\r", "ATFR\r"]);
}

#[test]
fn send_data_and_receive_reply() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    supervisor.send_data(NODE, b"ping").unwrap();
    let frame = supervisor
        .recv_from_address(NODE, Duration::from_secs(2))
        .unwrap();
    assert_eq!(frame.received_data(), Some(&b"ping"[..]));
}

#[test]
fn failed_delivery_reports_status() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    let err = supervisor.send_data(NODE, b"drop").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Status(ResponseStatus::Transmit(TxStatus::NoAck))
    ));
}

#[test]
fn unknown_local_command_reports_status() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);
    assert!(matches!(
        supervisor.local_at_query(b"ZZ"),
        Err(EngineError::Status(ResponseStatus::LocalAt(_)))
    ));
}

#[test]
fn remote_query_with_and_without_ack() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    let value = supervisor.remote_at_query(NODE, b"D0", true).unwrap();
    assert_eq!(value.as_deref(), Some(&[0x05][..]));

    assert_eq!(supervisor.remote_at_query(NODE, b"D0", false).unwrap(), None);
    let deadline = Instant::now() + Duration::from_secs(2);
    while !module.log().contains(&"REMOTE_AT_COMMAND:0".to_string()) {
        assert!(Instant::now() < deadline, "unacknowledged request never arrived");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn transparent_dialogs() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    assert_eq!(
        supervisor
            .transparent_at_dialog(b"ATVR\r", b"\r", false)
            .unwrap(),
        "10E8"
    );
    assert_eq!(
        supervisor.discover_nodes().unwrap(),
        "0001\r0013A200\r40000002"
    );

    // API frames still flow after returning from command mode.
    assert!(supervisor.local_at_query(b"MY").is_ok());
}

#[test]
fn provisioning_runs_before_ready() {
    let module = FakeModule::spawn(2);
    let plan = ProvisionPlan {
        steps: vec![ProvisionStep::enforce("ID", "afae")],
        save: true,
    };
    let supervisor = Supervisor::builder(config_for(&module))
        .with_provisioner(plan)
        .spawn()
        .unwrap();
    supervisor.wait_ready(Duration::from_secs(10)).unwrap();

    assert_eq!(module.param("ID"), Some(vec![0xaf, 0xae]));
}

#[test]
fn reconnects_after_gateway_hangs_up() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    assert!(supervisor.send_data(NODE, b"hangup").is_err());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if module.connections() >= 2 && supervisor.local_at_query(b"MY").is_ok() {
            break;
        }
        assert!(Instant::now() < deadline, "never reconnected");
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn requests_do_not_wait_behind_a_slow_reply() {
    let module = FakeModule::spawn(2);
    let supervisor = Arc::new(ready(&module));

    let slow = thread::spawn({
        let supervisor = Arc::clone(&supervisor);
        move || {
            let start = Instant::now();
            let value = supervisor.local_at_query(b"SL");
            (value, start.elapsed())
        }
    });
    let deadline = Instant::now() + Duration::from_secs(2);
    while !module.log().iter().any(|entry| entry.starts_with("AT_COMMAND:")) {
        assert!(Instant::now() < deadline, "slow request never arrived");
        thread::sleep(Duration::from_millis(5));
    }

    let start = Instant::now();
    assert_eq!(supervisor.local_at_query(b"MY").unwrap().as_ref(), &[0xFF, 0xFE]);
    supervisor.send_data(NODE, b"ping").unwrap();
    assert!(start.elapsed() < SLOW_REPLY / 2);

    let (value, took) = slow.join().unwrap();
    assert_eq!(value.unwrap().as_ref(), &[0x40, 0x00, 0x00, 0x01]);
    assert!(took >= SLOW_REPLY);
}

#[test]
fn concurrent_dialogs_do_not_interleave() {
    let module = FakeModule::spawn(2);
    let supervisor = Arc::new(ready(&module));
    let before = module.log().len();

    let dialogs: Vec<_> = [&b"ATVR\r"[..], &b"ATHV\r"[..]]
        .into_iter()
        .map(|command| {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.transparent_at_dialog(command, b"\r", false))
        })
        .collect();
    for dialog in dialogs {
        dialog.join().unwrap().unwrap();
    }

    let exchanges: Vec<String> = module.log()[before..].to_vec();
    assert_eq!(exchanges.len(), 6, "log: {exchanges:?}");
    for exchange in exchanges.chunks(3) {
        assert_eq!(exchange[0], "+++");
        assert!(exchange[1] == "ATVR\r" || exchange[1] == "ATHV\r");
        assert_eq!(exchange[2], "ATCN\r");
    }
    assert_ne!(exchanges[1], exchanges[4]);
}

#[test]
fn reset_leaves_command_mode_without_atcn() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);
    let before = module.log().len();

    assert_eq!(supervisor.reset_module().unwrap(), "OK");
    thread::sleep(Duration::from_millis(100));

    assert_eq!(module.log()[before..].to_vec(), vec!["+++", "ATFR\r"]);
}

#[test]
fn io_samples_are_picked_by_api_and_address() {
    let module = FakeModule::spawn(2);
    let supervisor = ready(&module);

    supervisor.send_data(NODE, b"sample").unwrap();
    let sample = supervisor
        .recv_by_api_and_address(api::RX_IO_64, NODE, Duration::from_secs(2))
        .unwrap();
    assert_eq!(sample.api_id, api::RX_IO_64);
    assert_eq!(sample.source_address(), Some(NODE));

    // The data packet from the same node is still waiting.
    let packet = supervisor
        .recv_by_api_and_address(api::RX_PACKET_64, NODE, Duration::from_secs(2))
        .unwrap();
    assert_eq!(packet.received_data(), Some(&b"sample"[..]));
    assert!(matches!(
        supervisor.recv_by_api_and_address(api::RX_IO_64, NODE, Duration::from_millis(50)),
        Err(EngineError::Timeout(_))
    ));
}

#[test]
fn shutdown_interrupts_negotiation_settle() {
    let module = FakeModule::spawn(0);
    let plan = NegotiationPlan {
        probe: Some(DialogStep::new("ATAP\r", "2")),
        steps: vec![DialogStep::new("ATFR\r", "OK")
            .skip_exit()
            .settle(Duration::from_secs(10))],
    };
    let supervisor = Supervisor::builder(config_for(&module))
        .with_negotiation(plan)
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !module.log().contains(&"ATFR\r".to_string()) {
        assert!(Instant::now() < deadline, "reset step never ran");
        thread::sleep(Duration::from_millis(10));
    }

    let start = Instant::now();
    supervisor.shutdown();
    assert!(start.elapsed() < Duration::from_secs(2));
}
