//! Shared test support: a scripted DZRP remote served over a real TCP
//! socket, plus an event sink that captures warnings and logpoint output.
//!
//! The mock does not execute Z80 code. It owns a slot-mapped memory model
//! and a register file, and each CONTINUE pops one scripted pause plan that
//! decides where "execution" lands. The client logic under test does all
//! real work: classification, conditions, step synthesis.

// Each integration test binary compiles its own view of this module and
// uses a different subset of it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use zedmon_dzrp::cmd::{BreakReason, Command, Notification};
use zedmon_dzrp::constants::{BANK_SIZE, DZRP_VERSION};
use zedmon_dzrp::frame::{encode_frame, try_decode_frames};
use zedmon_dzrp::payload::{
    decode_add_bp_args, decode_continue_args, decode_set_register_args, InitResponse,
    PauseNotification, RemoteCaps,
};
use zedmon_dzrp::registers::{Reg, RegisterFile};

use zedmon_remote::events::EventSink;
use zedmon_remote::net::transport;
use zedmon_remote::session::Session;
use zedmon_remote::Settings;

/// What one CONTINUE "runs" to.
#[derive(Debug, Clone)]
pub struct PausePlan {
    /// PC after the resume; `None` lands on the first alternate breakpoint.
    pub pc: Option<u16>,
    /// New SP, if the plan changes it.
    pub sp: Option<u16>,
    pub reason: BreakReason,
    /// Notification address; defaults to the landing PC.
    pub address: Option<u16>,
    pub message: String,
}

impl PausePlan {
    pub fn land(reason: BreakReason, pc: u16) -> Self {
        Self {
            pc: Some(pc),
            sp: None,
            reason,
            address: None,
            message: String::new(),
        }
    }

    pub fn with_sp(mut self, sp: u16) -> Self {
        self.sp = Some(sp);
        self
    }
}

pub struct MockState {
    pub regs: RegisterFile,
    pub slots: [u8; 8],
    banks: Vec<Vec<u8>>,
    pub breakpoints: HashMap<u16, u16>,
    next_bp_id: u16,
    pub plans: Vec<PausePlan>,
    /// CONTINUE alternate breakpoints, in issue order.
    pub continues: Vec<(Option<u16>, Option<u16>)>,
    /// Command names with key arguments, in receive order.
    pub ops: Vec<String>,
    pub state_blob: Vec<u8>,
    pub written_state: Option<Vec<u8>>,
    pub border: Option<u8>,
    /// True between a CONTINUE with no plan and the next PAUSE command.
    running: bool,
    /// Swallow the next request without answering (timeout tests).
    pub mute_next: bool,
}

impl MockState {
    fn new() -> Self {
        Self {
            regs: RegisterFile::default(),
            // ZX 128 default paging: ROM, ROM, then banks 5, 2, 0.
            slots: [254, 255, 10, 11, 4, 5, 0, 1],
            banks: vec![vec![0u8; BANK_SIZE]; 256],
            breakpoints: HashMap::new(),
            next_bp_id: 1,
            plans: Vec::new(),
            continues: Vec::new(),
            ops: Vec::new(),
            state_blob: b"opaque remote state".to_vec(),
            written_state: None,
            border: None,
            running: false,
            mute_next: false,
        }
    }

    fn mem_read(&self, addr: u16) -> u8 {
        let bank = self.slots[(addr >> 13) as usize] as usize;
        self.banks[bank][(addr & 0x1FFF) as usize]
    }

    fn mem_write(&mut self, addr: u16, value: u8) {
        let bank = self.slots[(addr >> 13) as usize] as usize;
        self.banks[bank][(addr & 0x1FFF) as usize] = value;
    }

    /// Test setup helper: write through the slot mapping.
    pub fn poke(&mut self, addr: u16, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.mem_write(addr.wrapping_add(i as u16), *b);
        }
    }

    pub fn bank(&self, bank: u8) -> &[u8] {
        &self.banks[bank as usize]
    }
}

pub struct Mock {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<MockState>>,
}

/// Start a mock remote with the given capabilities. Serves one connection.
pub async fn start_mock(caps: RemoteCaps) -> Mock {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(Mutex::new(MockState::new()));

    let serve_state = Arc::clone(&state);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, serve_state, caps).await;
    });

    Mock { addr, state }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<MockState>>, caps: RemoteCaps) {
    let _ = stream.set_nodelay(true);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
            return;
        }
        let (bodies, consumed) = {
            let (frames, consumed) = match try_decode_frames(&buf) {
                Ok(ok) => ok,
                Err(_) => return,
            };
            let bodies: Vec<Vec<u8>> = frames.iter().map(|f| f.body.to_vec()).collect();
            (bodies, consumed)
        };
        bytes::Buf::advance(&mut buf, consumed);

        for body in bodies {
            let replies = handle(&state, caps, &body);
            for reply in replies {
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn response(cmd: Command, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![cmd.response_opcode()];
    body.extend_from_slice(payload);
    encode_frame(&body)
}

fn pause_frame(ntf: &PauseNotification) -> Vec<u8> {
    let mut body = vec![Notification::Pause as u8];
    body.extend_from_slice(&ntf.encode());
    encode_frame(&body)
}

/// Handle one request; returns the frames to write back.
fn handle(state: &Arc<Mutex<MockState>>, caps: RemoteCaps, body: &[u8]) -> Vec<Vec<u8>> {
    let mut st = state.lock().unwrap();
    let cmd = Command::from_repr(body[0]).expect("mock got unknown opcode");
    let args = &body[1..];
    st.ops.push(op_entry(cmd, args));

    if st.mute_next {
        st.mute_next = false;
        return Vec::new();
    }

    match cmd {
        Command::Init => {
            let init = InitResponse {
                version: DZRP_VERSION,
                machine: 1,
                caps,
                banner: "mock-zxnext".into(),
            };
            vec![response(cmd, &init.encode())]
        }
        Command::GetRegisters => vec![response(cmd, &st.regs.encode())],
        Command::SetRegister => {
            let (reg, value) = decode_set_register_args(args).unwrap();
            st.regs.set(reg, value);
            vec![response(cmd, &[])]
        }
        Command::WriteBank => {
            let bank = args[0] as usize;
            st.banks[bank].copy_from_slice(&args[1..]);
            vec![response(cmd, &[])]
        }
        Command::Continue => {
            let (bp1, bp2) = decode_continue_args(args).unwrap();
            st.continues.push((bp1, bp2));
            let ack = response(cmd, &[]);
            if st.plans.is_empty() {
                // Nothing scripted: keep "running" until a PAUSE arrives.
                st.running = true;
                return vec![ack];
            }
            let plan = st.plans.remove(0);
            let pc = plan.pc.or(bp1).unwrap_or_else(|| st.regs.pc());
            st.regs.set(Reg::Pc, pc);
            if let Some(sp) = plan.sp {
                st.regs.set(Reg::Sp, sp);
            }
            let ntf = PauseNotification {
                reason: plan.reason,
                address: plan.address.unwrap_or(pc),
                message: plan.message.clone(),
            };
            vec![ack, pause_frame(&ntf)]
        }
        Command::Pause => {
            let ack = response(cmd, &[]);
            if st.running {
                st.running = false;
                let ntf = PauseNotification {
                    reason: BreakReason::ManualBreak,
                    address: st.regs.pc(),
                    message: String::new(),
                };
                return vec![ack, pause_frame(&ntf)];
            }
            vec![ack]
        }
        Command::AddBreakpoint => {
            let (addr, _cond) = decode_add_bp_args(args).unwrap();
            let id = st.next_bp_id;
            st.next_bp_id += 1;
            st.breakpoints.insert(id, addr);
            vec![response(cmd, &id.to_le_bytes())]
        }
        Command::RemoveBreakpoint => {
            let id = u16::from_le_bytes([args[0], args[1]]);
            st.breakpoints.remove(&id);
            vec![response(cmd, &[])]
        }
        Command::AddWatchpoint | Command::RemoveWatchpoint => vec![response(cmd, &[])],
        Command::ReadMem => {
            let addr = u16::from_le_bytes([args[0], args[1]]);
            let size = u16::from_le_bytes([args[2], args[3]]);
            let data: Vec<u8> = (0..size)
                .map(|i| st.mem_read(addr.wrapping_add(i)))
                .collect();
            vec![response(cmd, &data)]
        }
        Command::WriteMem => {
            let addr = u16::from_le_bytes([args[0], args[1]]);
            for (i, b) in args[2..].iter().enumerate() {
                st.mem_write(addr.wrapping_add(i as u16), *b);
            }
            vec![response(cmd, &[])]
        }
        Command::GetSlots => {
            let slots = st.slots;
            vec![response(cmd, &slots)]
        }
        Command::ReadState => {
            let blob = st.state_blob.clone();
            vec![response(cmd, &blob)]
        }
        Command::WriteState => {
            st.written_state = Some(args.to_vec());
            vec![response(cmd, &[])]
        }
        Command::SetBorder => {
            st.border = Some(args[0]);
            vec![response(cmd, &[])]
        }
        Command::GetTbblueReg => vec![response(cmd, &[0x42])],
        Command::GetSpritesPalette
        | Command::GetSprites
        | Command::GetSpritePatterns
        | Command::GetSpriteClip => vec![response(cmd, &[0xAA, 0xBB])],
    }
}

fn op_entry(cmd: Command, args: &[u8]) -> String {
    match cmd {
        Command::ReadMem | Command::WriteMem => {
            let addr = u16::from_le_bytes([args[0], args[1]]);
            format!("{} {:#06x}", cmd.name(), addr)
        }
        _ => cmd.name().to_string(),
    }
}

/// Event sink that records warnings and logpoint lines for assertions.
#[derive(Clone, Default)]
pub struct CaptureSink {
    pub log_lines: Arc<Mutex<Vec<String>>>,
    pub warnings: Arc<Mutex<Vec<String>>>,
}

impl EventSink for CaptureSink {
    fn log_line(&self, line: &str) {
        self.log_lines.lock().unwrap().push(line.to_string());
    }

    fn warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

pub fn test_settings(addr: SocketAddr) -> Settings {
    Settings {
        endpoint: addr.to_string(),
        response_timeout_ms: 2_000,
        // Keep pacer yields out of test timing.
        yield_interval_ms: 60_000,
        ..Settings::default()
    }
}

/// Connect a session to the mock with a capturing sink.
pub async fn connect(mock: &Mock) -> (Session, CaptureSink) {
    let sink = CaptureSink::default();
    let transport = transport::connect(&mock.addr.to_string(), std::time::Duration::from_secs(1))
        .await
        .unwrap();
    let session = Session::attach(
        transport,
        test_settings(mock.addr),
        Box::new(zedmon_remote::labels::NoLabels),
        Box::new(sink.clone()),
    )
    .await
    .unwrap();
    (session, sink)
}

pub fn all_caps() -> RemoteCaps {
    RemoteCaps::all()
}
