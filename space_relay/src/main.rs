//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p space_relay -- [--config space.json] [--addr 127.0.0.1:40000] [--name lobby]
//!
//! Console commands:
//!   status          - Show relay status
//!   clients         - List connected clients
//!   entities        - List cached entities
//!   kick <id>       - Disconnect a client
//!   quit            - Shutdown relay

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use space_relay::Relay;
use space_shared::config::SpaceConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<SpaceConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SpaceConfig::from_file(&args[i + 1])?,
        _ => SpaceConfig::default(),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.space_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("parse args")?;
    info!(addr = %cfg.server_addr, space = %cfg.space_name, "Starting relay");

    let mut relay = Relay::bind(cfg).await.context("bind relay")?;
    let local = relay.local_addr()?;
    info!(%local, "Relay listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    relay.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Relay ready. Type 'status' for info, 'quit' to exit.");
    println!();

    relay.run().await
}
