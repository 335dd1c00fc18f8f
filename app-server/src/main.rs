use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use clap::Parser;
use dradu_core::server::FrontDesk;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 8889;

#[derive(Parser, Debug)]
#[command(name = "dradu-server")]
#[command(about = "Shared-tabletop session server", long_about = None)]
struct Args {
    /// Open the server on a custom port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let ip = transport_tcp::net::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let addr = SocketAddr::new(ip, args.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Starting server on {addr}");

    let desk = FrontDesk::new(listener);
    tokio::select! {
        res = desk.run() => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
