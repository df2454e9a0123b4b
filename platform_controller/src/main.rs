//! Platform controller process: wires the position server, the regulation
//! layer and the arm backend together, then hands the terminal to a
//! minimal console until the operator exits or the sender goes away.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eyre::Result;
use hexapod_lib::{init_tracing, Mailbox, PlatformConfig};
use tracing::info;

mod hal;
mod regulation;
mod runtime;
mod server;

use crate::regulation::worker::WorkerHandle;
use crate::regulation::Regulation;
use crate::runtime::RunFlag;
use crate::server::PositionServer;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let _guard = init_tracing();

    let config_path =
        std::env::var("PLATFORM_CONFIG").unwrap_or_else(|_| "config/platform.toml".to_string());
    let config = PlatformConfig::load_from_file(&config_path)
        .map_err(|e| eyre::eyre!("failed to load platform config from {}: {}", config_path, e))?;
    config.validate()?;

    info!(backend = ?config.hal.backend, port = config.server.port, "starting platform controller");

    let run = RunFlag::new();
    let mailbox = Arc::new(Mailbox::new());

    let mut position_server = PositionServer::start(&config.server, mailbox.clone(), run.clone())?;
    let arms = hal::build_arms(&config.hal)?;
    let regulation = Regulation::start(arms, &config.regulation, mailbox.clone(), run.clone());

    // console thread; the process also shuts down when the coordinator
    // reports end-of-stream, so main just watches the run flag
    {
        let run = run.clone();
        let handles = regulation.handles();
        thread::Builder::new()
            .name("console".to_string())
            .spawn(move || console_loop(run, handles))
            .expect("failed to spawn console thread");
    }

    while run.is_running() {
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    position_server.stop();
    regulation.join();
    info!("shutdown complete");
    Ok(())
}

/// A simple console. Blocks on stdin until the operator enters `exit` or
/// the input stream ends.
fn console_loop(run: RunFlag, handles: Vec<WorkerHandle>) {
    println!("Welcome to {NAME} v{VERSION}!");
    println!("Enter help for a list of commands.");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim().to_lowercase().as_str() {
            "" => {}
            "help" => {
                println!("{NAME} v{VERSION}");
                println!("exit      exits the program");
                println!("status    prints the state of every arm");
                println!("help      prints this help");
            }
            "status" => {
                for handle in &handles {
                    let state = if handle.is_faulted() {
                        "faulted"
                    } else if handle.is_moving() {
                        "moving"
                    } else {
                        "idle"
                    };
                    println!(
                        "arm {}: position {}/{} ({state})",
                        handle.id(),
                        handle.position(),
                        handle.max_position(),
                    );
                }
            }
            "exit" => break,
            _ => println!("Unknown command. Enter help for a list of commands."),
        }

        if !run.is_running() {
            break;
        }
    }

    run.request_stop();
}
