//! Helpers shared by the socket-level integration tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::bail;
use space_client::{loader::Loader, Collaborators, Space};
use space_relay::bind_ephemeral;
use space_shared::config::SpaceConfig;

/// Simulated frame length used when pumping clients.
pub const FRAME: f32 = 1.0 / 60.0;

/// How long a pump waits before giving up.
pub const PUMP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Starts a relay on an ephemeral port in the background.
pub async fn start_relay() -> anyhow::Result<SocketAddr> {
    let relay = bind_ephemeral(SpaceConfig::default()).await?;
    let addr = relay.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = relay.run().await {
            tracing::error!(error = %e, "relay stopped");
        }
    });
    Ok(addr)
}

/// Connects a headless client and pumps it until `init` has been applied.
pub async fn connect_client(
    addr: SocketAddr,
    name: &str,
    loader: Arc<dyn Loader>,
) -> anyhow::Result<Space> {
    let cfg = SpaceConfig {
        server_addr: addr.to_string(),
        player_name: name.to_string(),
        auth_token: name.to_string(),
        ..SpaceConfig::default()
    };
    let mut space = Space::connect(cfg, Collaborators::headless(loader)).await?;
    pump_until(&mut [&mut space], |s| s[0].is_active()).await?;
    Ok(space)
}

/// Ticks every space by one frame until `done` holds, yielding to the
/// runtime in between so socket and load tasks make progress.
pub async fn pump_until<F>(spaces: &mut [&mut Space], mut done: F) -> anyhow::Result<()>
where
    F: FnMut(&[&mut Space]) -> bool,
{
    let deadline = tokio::time::Instant::now() + PUMP_TIMEOUT;
    loop {
        for space in spaces.iter_mut() {
            space.tick(FRAME);
        }
        if done(spaces) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached within {PUMP_TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Pumps for a fixed number of frames.
pub async fn pump_frames(spaces: &mut [&mut Space], frames: usize) {
    for _ in 0..frames {
        for space in spaces.iter_mut() {
            space.tick(FRAME);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
