//! repgate - gateway control plane driver

use repgate_common::SystemClock;
use repgate_gateway::driver::{self, Command};
use repgate_gateway::{Gateway, GatewayConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the JSON decisions
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("repgate v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::from_env();
    let gateway = Gateway::from_config(&config, SystemClock::shared()).await?;

    let reaper = gateway
        .admission()
        .clone()
        .spawn_reaper(config.admission.reaper_interval(), config.admission.max_idle());

    if let Ok(bootstrap) = std::env::var("REPGATE_BOOTSTRAP_KEYS") {
        for (owner, tier) in driver::parse_bootstrap(&bootstrap)? {
            let issued = driver::execute(&gateway, Command::Issue {
                owner_id: owner,
                tier,
                label: Some("bootstrap".into()),
            });
            println!("{}", issued);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        match Command::parse(&line) {
            Ok(command) => println!("{}", driver::execute(&gateway, command)),
            Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
        }
    }

    reaper.abort();
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
