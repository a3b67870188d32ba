//! Standalone shop stream server
//!
//! Run with: cargo run --example shop_relay [BIND_ADDR] [--demo SHOP_ID]
//!
//! Examples:
//!   cargo run --example shop_relay                       # binds to 0.0.0.0:8080
//!   cargo run --example shop_relay localhost             # binds to 127.0.0.1:8080
//!   cargo run --example shop_relay 127.0.0.1:9000 --demo shop-1
//!
//! Identity comes from gateway headers (`x-user-id`, `x-username`). Set
//! `ALLOWED_ORIGINS` to a comma-separated list to restrict browser origins.
//!
//! ## Subscribing
//!
//! With websocat:
//!   websocat -H 'x-user-id: u1' ws://localhost:8080/shops/shop-1/messages/stream
//!
//! With `--demo SHOP_ID` the server broadcasts a generated message to that
//! shop every few seconds.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;

use shop_relay::server::TrustedHeaderAuthorizer;
use shop_relay::{
    BroadcastEnvelope, Hub, HubConfig, ServerConfig, ShopMessage, ShopMessageWithUsername,
    ShopStreamServer,
};

const DEFAULT_PORT: u16 = 8080;

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    println!("Usage: shop_relay [BIND_ADDR] [--demo SHOP_ID]");
    println!();
    println!("Arguments:");
    println!("  BIND_ADDR       Address to bind (default: 0.0.0.0:{DEFAULT_PORT})");
    println!("  --demo SHOP_ID  Broadcast a generated message to SHOP_ID every 5s");
    println!();
    println!("Environment:");
    println!("  ALLOWED_ORIGINS Comma-separated origin allow-list (default: any)");
    println!("  RUST_LOG        Log filter");
}

/// Periodically broadcast a generated message, as a persistence layer would
async fn demo_ticker(hub: Hub, shop_id: String) {
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    let mut seq = 0u64;

    loop {
        tick.tick().await;
        if hub.is_shut_down() {
            return;
        }
        seq += 1;

        let message = ShopMessage {
            id: format!("demo-{seq}"),
            shop_id: shop_id.clone(),
            user_id: "demo-bot".into(),
            message: format!("Demo message #{seq}"),
            created_at: Some(Utc::now()),
            updated_at: None,
            is_edited: Some(false),
        };
        hub.broadcast(BroadcastEnvelope::new(
            shop_id.as_str(),
            ShopMessageWithUsername::new(message, "Demo Bot"),
        ));

        let stats = hub.stats().await;
        tracing::info!(
            seq,
            connections = stats.active_connections,
            shops = stats.active_shops,
            frames = stats.frames_enqueued,
            "Demo broadcast"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut bind_addr = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
    let mut demo_shop = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--demo" {
            match iter.next() {
                Some(shop) => demo_shop = Some(shop.clone()),
                None => {
                    eprintln!("Error: --demo needs a shop id");
                    print_usage();
                    std::process::exit(1);
                }
            }
            continue;
        }
        match parse_bind_addr(arg) {
            Ok(addr) => bind_addr = addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shop_relay=debug".parse()?),
        )
        .init();

    let origins = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
    let config = ServerConfig::with_addr(bind_addr).allowed_origins_csv(&origins);

    let hub = Hub::spawn(HubConfig::default())?;
    let server = ShopStreamServer::new(config, hub.clone(), TrustedHeaderAuthorizer);

    println!("Starting shop stream server on {}", server.bind_addr());
    println!("Stream route: ws://{}/shops/{{shop_id}}/messages/stream", server.bind_addr());
    println!();

    if let Some(shop_id) = demo_shop {
        println!("Broadcasting demo messages to shop '{}'", shop_id);
        tokio::spawn(demo_ticker(hub.clone(), shop_id));
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to listen for Ctrl+C: {}", e);
        }
        println!("\nShutting down...");
    };

    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    let stats = hub.stats().await;
    println!(
        "Final stats: broadcasts={} dropped={} frames={} evicted={}",
        stats.broadcasts_accepted,
        stats.broadcasts_dropped,
        stats.frames_enqueued,
        stats.slow_consumers_evicted,
    );

    Ok(())
}
