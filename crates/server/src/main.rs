mod config;
mod events;
mod server;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;

#[derive(Parser)]
#[command(name = "strata-server")]
#[command(about = "Strata authoritative match server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = strata::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = strata::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 2, help = "Number of entity layers")]
    layers: u16,

    #[arg(long, default_value_t = 8, help = "Scripted entities wandering the map")]
    demo_entities: usize,

    #[arg(long, help = "Byte budget for one MatchState packet")]
    mtu_budget: Option<usize>,

    #[arg(long, default_value_t = 10, help = "Seconds of silence before a client is dropped")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let mut config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.timeout),
        ..Default::default()
    };
    config.game.layer_count = args.layers;
    config.game.demo_entities = args.demo_entities;
    if let Some(budget) = args.mtu_budget {
        config.game.visibility.mtu_budget = budget;
    }

    let mut server = GameServer::bind(&bind_addr, config).await?;
    log::info!("Server started on {}", server.local_addr());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(Duration::from_millis(1));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => server.tick_once().await?,
        }

        for event in server.drain_events() {
            log_event(event);
        }
    }

    log::info!("Server shutting down");
    server.shutdown_connections().await;

    Ok(())
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            log::info!("Connection request from {}", addr);
        }
        ServerEvent::ClientConnected {
            client_id,
            addr,
            entities,
        } => {
            log::info!(
                "Client {} connected from {} (entities {:?})",
                client_id,
                addr,
                entities
            );
        }
        ServerEvent::ClientDisconnected { client_id, reason } => {
            log::info!("Client {} {}", client_id, reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
        ServerEvent::Error { message } => {
            log::error!("{}", message);
        }
    }
}
