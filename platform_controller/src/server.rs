//! Position ingest: TCP listener feeding the regulation mailbox.
//!
//! One client connection is serviced at a time. Each frame is a 2-byte
//! big-endian payload length followed by that many bytes of UTF-8 text
//! carrying six comma-separated leg lengths. Malformed frames are logged
//! and dropped; transport faults close the connection and the listener
//! keeps accepting. No response is ever sent.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eyre::{Result, WrapErr};
use hexapod_lib::{LegPosition, Mailbox, ServerConfig};
use tracing::{info, warn};

use crate::runtime::RunFlag;

// how often the accept loop rechecks the run flag
const ACCEPT_POLL: Duration = Duration::from_millis(50);

// read timeout on client sockets, so frame reads observe the run flag
const READ_TIMEOUT: Duration = Duration::from_millis(250);

pub struct PositionServer {
    local_addr: SocketAddr,
    mailbox: Arc<Mailbox<LegPosition>>,
    // server-local stop signal, so stop() unblocks the loop on its own
    local: RunFlag,
    thread: Option<JoinHandle<()>>,
}

impl PositionServer {
    /// Binds the listener and spawns the accept loop. A failed bind is
    /// fatal at startup.
    pub fn start(
        cfg: &ServerConfig,
        mailbox: Arc<Mailbox<LegPosition>>,
        run: RunFlag,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", cfg.port))
            .wrap_err_with(|| format!("failed to bind position server to port {}", cfg.port))?;
        listener
            .set_nonblocking(true)
            .wrap_err("failed to make the listener non-blocking")?;
        let local_addr = listener
            .local_addr()
            .wrap_err("failed to read the listener address")?;

        info!(addr = %local_addr, "position server listening");

        let local = RunFlag::new();
        let thread = {
            let mailbox = mailbox.clone();
            let local = local.clone();
            thread::Builder::new()
                .name("position-server".to_string())
                .spawn(move || accept_loop(listener, mailbox, run, local))
                .expect("failed to spawn position server thread")
        };

        Ok(Self {
            local_addr,
            mailbox,
            local,
            thread: Some(thread),
        })
    }

    /// Address the listener is bound to (useful with an ephemeral port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals the accept loop to terminate, closes the mailbox (consumers
    /// observe end-of-stream) and blocks until the listener thread has
    /// exited. Idempotent.
    pub fn stop(&mut self) {
        self.local.request_stop();
        self.mailbox.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    mailbox: Arc<Mailbox<LegPosition>>,
    run: RunFlag,
    local: RunFlag,
) {
    while run.is_running() && local.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "client connected");
                match serve_client(stream, &mailbox, &run, &local) {
                    Ok(()) => info!(%peer, "client disconnected; listening for a new connection"),
                    Err(e) => warn!(%peer, error = %e, "connection failed; listening for a new connection"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    info!("position server stopped");
}

fn serve_client(
    mut stream: TcpStream,
    mailbox: &Mailbox<LegPosition>,
    run: &RunFlag,
    local: &RunFlag,
) -> io::Result<()> {
    // the listener is non-blocking; its accepted sockets must not be
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    loop {
        let payload = match read_frame(&mut stream, run, local)? {
            FrameRead::Frame(payload) => payload,
            FrameRead::Eof => return Ok(()),
            FrameRead::Shutdown => return Ok(()),
        };

        let text = match std::str::from_utf8(&payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "dropping frame with invalid UTF-8 payload");
                continue;
            }
        };

        match LegPosition::from_frame_text(text) {
            Ok(position) => {
                tracing::debug!(%position, "received position");
                mailbox.publish(position);
            }
            Err(e) => warn!(error = %e, payload = text, "dropping malformed position frame"),
        }
    }
}

enum FrameRead {
    Frame(Vec<u8>),
    Eof,
    Shutdown,
}

fn read_frame(stream: &mut TcpStream, run: &RunFlag, local: &RunFlag) -> io::Result<FrameRead> {
    let mut header = [0u8; 2];
    match read_full(stream, &mut header, run, local)? {
        ReadFull::Filled => {}
        ReadFull::Eof { partial: false } => return Ok(FrameRead::Eof),
        ReadFull::Eof { partial: true } => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a frame header",
            ))
        }
        ReadFull::Shutdown => return Ok(FrameRead::Shutdown),
    }

    let length = usize::from(u16::from_be_bytes(header));
    let mut payload = vec![0u8; length];
    match read_full(stream, &mut payload, run, local)? {
        ReadFull::Filled => Ok(FrameRead::Frame(payload)),
        ReadFull::Eof { .. } => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed inside a frame payload",
        )),
        ReadFull::Shutdown => Ok(FrameRead::Shutdown),
    }
}

enum ReadFull {
    Filled,
    Eof { partial: bool },
    Shutdown,
}

/// Fills `buf` completely, treating read timeouts as run-flag checkpoints
/// so a quiet connection never wedges shutdown.
fn read_full(
    stream: &mut TcpStream,
    buf: &mut [u8],
    run: &RunFlag,
    local: &RunFlag,
) -> io::Result<ReadFull> {
    let mut filled = 0;
    while filled < buf.len() {
        if !run.is_running() || !local.is_running() {
            return Ok(ReadFull::Shutdown);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(ReadFull::Eof {
                    partial: filled > 0,
                })
            }
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadFull::Filled)
}
