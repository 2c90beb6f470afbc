//! Request dispatcher on top of the transport.
//!
//! The protocol is strictly request/response with one request in flight —
//! guaranteed here by `&mut self` on every wire method — except for the
//! pause-notification path: between a CONTINUE and its pause notification
//! other commands may run, but a second resume is refused until the pause
//! arrived. Pause notifications that arrive while a request is awaiting its
//! response are queued and delivered by [`DzrpLink::wait_pause`].

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use zedmon_dzrp::cmd::{Command, Notification};
use zedmon_dzrp::constants::RESPONSE_FLAG;
use zedmon_dzrp::error::DzrpError;
use zedmon_dzrp::frame::encode_request;
use zedmon_dzrp::payload::{continue_args, PauseNotification};

use crate::error::SessionError;
use crate::net::transport::{FrameOwned, OutboundTx, Transport, TransportEvent};

pub struct DzrpLink {
    out_tx: OutboundTx,
    events: mpsc::Receiver<TransportEvent>,
    pending_pauses: VecDeque<PauseNotification>,
    /// Invariant: true iff a CONTINUE has been acked and its pause
    /// notification has not yet been consumed.
    resume_pending: bool,
    response_timeout: Duration,
    closed: Option<String>,
}

impl DzrpLink {
    pub fn new(transport: Transport, response_timeout: Duration) -> Self {
        Self {
            out_tx: transport.out_tx,
            events: transport.events,
            pending_pauses: VecDeque::new(),
            resume_pending: false,
            response_timeout,
            closed: None,
        }
    }

    /// Clonable sender for the out-of-band PAUSE path.
    pub fn outbound(&self) -> OutboundTx {
        self.out_tx.clone()
    }

    pub fn resume_pending(&self) -> bool {
        self.resume_pending
    }

    /// Drop the outbound side, which lets the writer task exit. Safe to call
    /// more than once.
    pub fn disconnect(&mut self) {
        if self.closed.is_none() {
            self.closed = Some("disconnected".into());
        }
        self.resume_pending = false;
        self.pending_pauses.clear();
        self.events.close();
    }

    /// Issue one command and await its response payload.
    pub async fn request(
        &mut self,
        cmd: Command,
        args: &[u8],
    ) -> Result<Bytes, SessionError> {
        self.ensure_open()?;
        trace!(cmd = cmd.name(), args_len = args.len(), "request");
        self.send_frame(cmd, args).await?;
        self.await_response(cmd).await
    }

    /// Issue CONTINUE with up to two alternate-step breakpoints. The ack is
    /// awaited here; the pause notification is consumed separately.
    pub async fn resume(
        &mut self,
        bp1: Option<u16>,
        bp2: Option<u16>,
    ) -> Result<(), SessionError> {
        if self.resume_pending {
            return Err(SessionError::Validation(
                "resume refused: previous resume has not paused yet".into(),
            ));
        }
        debug!(?bp1, ?bp2, "resume");
        self.request(Command::Continue, &continue_args(bp1, bp2))
            .await?;
        self.resume_pending = true;
        Ok(())
    }

    /// Await the pause notification that terminates the in-flight resume.
    ///
    /// `limit` of `None` waits indefinitely (the debuggee may legitimately
    /// run forever); a timeout is an error the stepping controller treats as
    /// fatal for the step.
    pub async fn wait_pause(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<PauseNotification, SessionError> {
        if let Some(ntf) = self.pending_pauses.pop_front() {
            self.resume_pending = false;
            return Ok(ntf);
        }
        self.ensure_open()?;

        let deadline = limit.map(|d| tokio::time::Instant::now() + d);
        loop {
            let event = match deadline {
                None => self.events.recv().await,
                Some(at) => match tokio::time::timeout_at(at, self.events.recv()).await {
                    Ok(ev) => ev,
                    Err(_) => {
                        return Err(SessionError::Timeout {
                            op: "NTF_PAUSE",
                            timeout: limit.unwrap_or_default(),
                        })
                    }
                },
            };
            match self.classify(event)? {
                Inbound::Notification(ntf) => {
                    self.resume_pending = false;
                    return Ok(ntf);
                }
                // Ack of an out-of-band PAUSE; nothing to deliver.
                Inbound::PauseAck => {}
                Inbound::Response(frame) => {
                    return Err(SessionError::UnexpectedResponse {
                        opcode: frame.opcode(),
                    });
                }
            }
        }
    }

    async fn send_frame(&mut self, cmd: Command, args: &[u8]) -> Result<(), SessionError> {
        let frame = Bytes::from(encode_request(cmd as u8, args));
        if self.out_tx.send(frame).await.is_err() {
            return Err(self.close_with("outbound channel closed"));
        }
        Ok(())
    }

    async fn await_response(&mut self, cmd: Command) -> Result<Bytes, SessionError> {
        let deadline = tokio::time::Instant::now() + self.response_timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(ev) => ev,
                Err(_) => {
                    return Err(SessionError::Timeout {
                        op: cmd.name(),
                        timeout: self.response_timeout,
                    })
                }
            };
            match self.classify(event)? {
                Inbound::Response(frame) if frame.opcode() == cmd.response_opcode() => {
                    return Ok(frame.payload());
                }
                Inbound::PauseAck => {}
                Inbound::Response(frame) => {
                    self.closed = Some(format!(
                        "unexpected response opcode {:#04x}",
                        frame.opcode()
                    ));
                    return Err(SessionError::UnexpectedResponse {
                        opcode: frame.opcode(),
                    });
                }
                // A pause can race any request issued after the resume ack.
                Inbound::Notification(ntf) => {
                    debug!(?ntf, "pause notification queued during request");
                    self.pending_pauses.push_back(ntf);
                }
            }
        }
    }

    fn classify(
        &mut self,
        event: Option<TransportEvent>,
    ) -> Result<Inbound, SessionError> {
        match event {
            None => Err(self.close_with("transport task ended")),
            Some(TransportEvent::Closed { reason }) => Err(self.close_with(&reason)),
            Some(TransportEvent::Frame(frame)) => {
                if frame.is_response() {
                    // A response must echo a command the registry knows.
                    let cmd_op = frame.opcode() & !RESPONSE_FLAG;
                    match Command::from_repr(cmd_op) {
                        None => Err(SessionError::Protocol(DzrpError::UnknownCommand(cmd_op))),
                        Some(Command::Pause) => Ok(Inbound::PauseAck),
                        Some(_) => Ok(Inbound::Response(frame)),
                    }
                } else {
                    match Notification::from_repr(frame.opcode()) {
                        Some(Notification::Pause) => Ok(Inbound::Notification(
                            PauseNotification::decode(&frame.payload())?,
                        )),
                        None => Err(SessionError::Protocol(DzrpError::UnknownNotification(
                            frame.opcode(),
                        ))),
                    }
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match &self.closed {
            None => Ok(()),
            Some(reason) => Err(SessionError::Transport(reason.clone())),
        }
    }

    fn close_with(&mut self, reason: &str) -> SessionError {
        if self.closed.is_none() {
            self.closed = Some(reason.to_string());
        }
        SessionError::Transport(reason.to_string())
    }
}

enum Inbound {
    Response(FrameOwned),
    Notification(PauseNotification),
    /// Response to an out-of-band PAUSE sent through a [`crate::PauseHandle`];
    /// skipped wherever it shows up.
    PauseAck,
}
