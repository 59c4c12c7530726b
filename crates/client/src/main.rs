pub mod net;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use clap::Parser;

use net::{ClientConfig, NetworkClient};

#[derive(Parser)]
#[command(name = "strata-client")]
#[command(about = "Headless Strata client driven by scripted input")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27016",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value_t = 1, help = "Local players sharing this connection")]
    players: u8,

    #[arg(long, help = "Disconnect after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Ticks of delay absorbing network jitter")]
    jitter_compensation: Option<u16>,

    #[arg(long, help = "Position error in pixels tolerated before rolling back")]
    position_tolerance: Option<f32>,

    #[arg(long, default_value_t = 5.0, help = "Seconds between statistics reports")]
    report_interval: f32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;

    let mut config = ClientConfig {
        player_count: args.players,
        report_interval_secs: args.report_interval,
        ..Default::default()
    };
    if let Some(ticks) = args.jitter_compensation {
        config.session.jitter_compensation = ticks;
    }
    if let Some(tolerance) = args.position_tolerance {
        config.session.reconcile.position_tolerance = tolerance;
    }

    let mut client = NetworkClient::new(config).await?;
    client.connect(server_addr).await?;

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(Duration::from_millis(1));
    let mut last_update = Instant::now();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                let now = Instant::now();
                let delta = now - last_update;
                last_update = now;
                client.update(delta.as_secs_f32()).await?;
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        if client.state() == strata::ConnectionState::Disconnected {
            log::warn!("No longer connected, exiting");
            break;
        }
    }

    client.report();
    client.disconnect().await?;
    log::info!("Client shutting down");

    Ok(())
}
