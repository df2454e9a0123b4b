//! Bench sender: reads leg-length lines from stdin and streams them to the
//! platform controller as length-prefixed frames.

use std::io::{BufRead, Write};
use std::net::TcpStream;

use eyre::{Result, WrapErr};
use hexapod_lib::{init_tracing, LegPosition};
use tracing::{info, warn};

fn main() -> Result<()> {
    let _guard = init_tracing();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4242".to_string());

    let mut stream =
        TcpStream::connect(&addr).wrap_err_with(|| format!("failed to connect to {addr}"))?;
    info!(%addr, "connected to platform controller");

    println!("Enter six comma-separated leg lengths (0..={}),", LegPosition::MAX);
    println!("e.g. 100,200,300,400,500,600 - Ctrl-D quits.");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match LegPosition::from_frame_text(line) {
            Ok(position) => {
                send_frame(&mut stream, &position.to_frame_text())?;
                info!(%position, "sent position");
            }
            Err(e) => warn!(error = %e, "not sent"),
        }
    }

    info!("input closed; done");
    Ok(())
}

/// Writes one frame: a 2-byte big-endian payload length, then the payload.
fn send_frame(stream: &mut TcpStream, payload: &str) -> Result<()> {
    let bytes = payload.as_bytes();
    let length = u16::try_from(bytes.len()).wrap_err("frame payload too long")?;
    stream.write_all(&length.to_be_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()?;
    Ok(())
}
