//! Byte-oriented duplex channel to the remote.
//!
//! The stream is split so read/write can progress independently: a writer
//! task drains an outbound queue of pre-framed bytes, and a reader task
//! reassembles frames from a growable buffer and forwards them as events.
//! Works over any tokio byte stream; TCP is what [`connect`] produces.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use zedmon_dzrp::frame::try_decode_frames;

/// Sender for pre-framed outbound bytes.
pub type OutboundTx = mpsc::Sender<Bytes>;

/// A decoded frame that owns its body (opcode + payload).
#[derive(Debug, Clone)]
pub struct FrameOwned {
    pub body: Bytes,
}

impl FrameOwned {
    pub fn opcode(&self) -> u8 {
        self.body[0]
    }

    pub fn payload(&self) -> Bytes {
        self.body.slice(1..)
    }

    pub fn is_response(&self) -> bool {
        self.opcode() & zedmon_dzrp::constants::RESPONSE_FLAG != 0
    }
}

/// Events produced by the reader task.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(FrameOwned),
    /// Terminal event; emitted exactly once, with a best-effort reason.
    Closed { reason: String },
}

pub struct Transport {
    pub out_tx: OutboundTx,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Hard cap to avoid unbounded buffering on a babbling remote.
const MAX_RX_BUFFER: usize = 4 * 1024 * 1024 + 64 * 1024;

/// Connect to a TCP remote, applying the connection timeout.
pub async fn connect(endpoint: &str, timeout: Duration) -> std::io::Result<Transport> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {endpoint} timed out after {timeout:?}"),
            )
        })??;
    let _ = stream.set_nodelay(true);
    let (read, write) = stream.into_split();
    Ok(spawn_io(read, write))
}

/// Wire a reader/writer pair into a [`Transport`]. Public so tests and
/// serial bridges can supply their own byte streams.
pub fn spawn_io<R, W>(read: R, write: W) -> Transport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<Bytes>(64);
    let (ev_tx, ev_rx) = mpsc::channel::<TransportEvent>(64);

    spawn_writer(write, out_rx);
    tokio::spawn(run_reader(read, ev_tx));

    Transport {
        out_tx,
        events: ev_rx,
    }
}

/// Writer task: exits when the outbound channel closes. Closing the channel
/// is the disconnect path, which makes disconnect idempotent.
fn spawn_writer<W>(
    mut write: W,
    mut rx: mpsc::Receiver<Bytes>,
) -> tokio::task::JoinHandle<anyhow::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            write.write_all(&frame).await?;
        }
        Ok(())
    })
}

async fn run_reader<R>(mut read: R, tx: mpsc::Sender<TransportEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let reason;

    loop {
        if buf.len() > MAX_RX_BUFFER {
            reason = format!("rx buffer exceeded limit ({MAX_RX_BUFFER} bytes)");
            break;
        }

        buf.reserve(4096);
        match read.read_buf(&mut buf).await {
            Ok(0) => {
                reason = "eof".to_string();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                reason = format!("read error: {e}");
                break;
            }
        }

        let (frames, consumed) = match try_decode_frames(&buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                reason = format!("protocol error: {e}");
                break;
            }
        };

        // Copy bodies out before releasing the consumed prefix.
        let owned: Vec<FrameOwned> = frames
            .iter()
            .map(|f| FrameOwned {
                body: Bytes::copy_from_slice(f.body),
            })
            .collect();
        bytes::Buf::advance(&mut buf, consumed);

        for frame in owned {
            if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                // Receiver is gone; nobody left to notify.
                return;
            }
        }
    }

    let _ = tx.send(TransportEvent::Closed { reason }).await;
}
