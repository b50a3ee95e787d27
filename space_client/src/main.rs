//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p space_client -- [--config space.json] [--addr 127.0.0.1:40000]
//!                                [--name Player] [--token guest] [--assets-dir assets]
//!                                [--avatar]
//!
//! Connects to a relay, joins the space and runs the frame loop headless.
//! Blueprints are read as JSON from the assets directory. Type `help` for
//! console commands.

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use space_client::{
    builtin::builtin_scripts,
    console,
    loader::DirLoader,
    space::{Collaborators, Space},
};
use space_shared::{config::SpaceConfig, event::SpaceEvent};
use tokio::{sync::mpsc, time::Instant};
use tracing::{error, info, warn};

const HELP: &str = "\
status | clients | entities
spawn <schema> [x y z] | remove <id> | reload <id>
grab <id> [edit] | move <id> <x> <y> <z> | release <id>
set <id> <key> <json> | name <name> | quit";

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
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--token" if i + 1 < args.len() => {
                cfg.auth_token = args[i + 1].clone();
                i += 2;
            }
            "--assets-dir" if i + 1 < args.len() => {
                cfg.assets_dir = args[i + 1].clone();
                i += 2;
            }
            "--avatar" => {
                cfg.spawn_avatar = true;
                i += 1;
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("parse args")?;
    info!(server = %cfg.server_addr, assets_dir = %cfg.assets_dir, "Starting client");

    let mut loader = DirLoader::new(&cfg.assets_dir);
    for (url, module) in builtin_scripts() {
        loader.register_script(url, module);
    }
    let frame = Duration::from_secs_f32(cfg.fixed_timestep());
    let mut space = Space::connect(cfg, Collaborators::headless(Arc::new(loader)))
        .await
        .context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Type 'help' for commands, 'quit' to exit.");

    let mut last = Instant::now();
    let mut ticker = tokio::time::interval(frame);
    loop {
        ticker.tick().await;

        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "quit" | "exit" => {
                    space.disconnect();
                    space.tick(0.0);
                    return Ok(());
                }
                "help" => println!("{HELP}"),
                _ => match console::exec(&mut space, &line) {
                    Ok(out) => out.iter().for_each(|l| println!("{l}")),
                    Err(e) => println!("Error: {e:#}"),
                },
            }
        }

        let now = Instant::now();
        let delta = now.duration_since(last).as_secs_f32();
        last = now;
        space.tick(delta);

        for event in space.drain_events() {
            match event {
                SpaceEvent::Active { client_id } => info!(%client_id, "Joined space"),
                SpaceEvent::ClientJoined { client_id } => info!(%client_id, "Client joined"),
                SpaceEvent::ClientLeft { client_id } => info!(%client_id, "Client left"),
                SpaceEvent::EntityKilled { id, reason } => {
                    warn!(entity = %id, %reason, "Entity died")
                }
                SpaceEvent::Disconnected { reason } => {
                    error!(%reason, "Disconnected from relay");
                    return Ok(());
                }
                SpaceEvent::Connected => {}
            }
        }
    }
}
