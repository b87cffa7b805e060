// ██████╗      ██╗███████╗
// ██╔══██╗     ██║██╔════╝
// ██║  ██║     ██║█████╗
// ██║  ██║██   ██║██╔══╝
// ██████╔╝╚█████╔╝███████╗
// ╚═════╝  ╚════╝ ╚══════╝
//
//  ██████╗  █████╗ ███████╗███████╗████████╗████████╗███████╗
// ██╔════╝ ██╔══██╗╚══███╔╝██╔════╝╚══██╔══╝╚══██╔══╝██╔════╝
// ██║  ███╗███████║  ███╔╝ █████╗     ██║      ██║   █████╗
// ██║   ██║██╔══██║ ███╔╝  ██╔══╝     ██║      ██║   ██╔══╝
// ╚██████╔╝██║  ██║███████╗███████╗   ██║      ██║   ███████╗
//  ╚═════╝ ╚═╝  ╚═╝╚══════╝╚══════╝   ╚═╝      ╚═╝   ╚══════╝
//
// E N G I N E
//
// The most overkill judicial-gazette harvester ever conceived.
// Rust + Tokio + Aho-Corasick + Rayon + a hand-rolled WebDriver client.
// All to find out who the INSS owes money to this week.

mod config;
mod detector;
mod extractor;
mod fallback;
mod models;
mod money;
mod orchestrator;
mod patterns;
mod progress;
mod publisher;
mod server;
mod session;
mod webdriver;

use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::progress::ProgressRegistry;

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║      ██████╗      ██╗███████╗    ████████╗     ██╗███████╗██████╗ ║
    ║      ██╔══██╗     ██║██╔════╝    ╚══██╔══╝     ██║██╔════╝██╔══██╗║
    ║      ██║  ██║     ██║█████╗         ██║        ██║███████╗██████╔╝║
    ║      ██║  ██║██   ██║██╔══╝         ██║   ██   ██║╚════██║██╔═══╝ ║
    ║      ██████╔╝╚█████╔╝███████╗       ██║   ╚█████╔╝███████║██║     ║
    ║      ╚═════╝  ╚════╝ ╚══════╝       ╚═╝    ╚════╝ ╚══════╝╚═╝     ║
    ║                                                                  ║
    ║            ⚖️  GAZETTE HARVESTING ENGINE  ⚖️                      ║
    ║                                                                  ║
    ║   Source:     DJE-TJSP daily bulletin                            ║
    ║   Extraction: Aho-Corasick + Rayon-parallel legalese parsing     ║
    ║   Transport:  Headless browser over the WebDriver wire           ║
    ║   Resilience: Bouncer detection + deterministic fallback         ║
    ║   Delivery:   Idempotent upserts (409 is a love letter)          ║
    ║                                                                  ║
    ║   "When the court publishes an RPV, somebody gets paid."         ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    print_banner();

    info!("⚖️ DJE GAZETTE ENGINE initializing...");

    // Load and validate configuration
    let config = Arc::new(Config::from_env());
    config.validate()?;
    info!(
        "✅ Configuration loaded: gazette={} api={} webdriver={}",
        config.gazette_base_url, config.api_url, config.webdriver_url
    );

    // Per-run progress registry
    let registry = Arc::new(ProgressRegistry::new());
    info!("✅ Progress registry online");

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ═══════════════════════════════════════════
    // SPAWN CONTROL SERVER
    // ═══════════════════════════════════════════
    let server_config = config.clone();
    let server_registry = registry.clone();
    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        info!("📋 Control server: ONLINE");
        server::run(server_config, server_registry, &mut server_shutdown).await;
        info!("📋 Control server: OFFLINE");
    });

    info!("═══════════════════════════════════════════════════════");
    info!("  🟢 ALL SYSTEMS ONLINE - DJE GAZETTE ENGINE ACTIVE");
    info!("  📋 Control surface at http://0.0.0.0:{}", config.server_port);
    info!("  🏛️ Watching {}", config.gazette_base_url);
    info!("  📤 Delivering to {}", config.api_url);
    info!("  ⚡ Press Ctrl+C for graceful shutdown");
    info!("═══════════════════════════════════════════════════════");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("🛑 Shutdown signal received!");
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!("❌ Signal listener error: {}", err);
            let _ = shutdown_tx.send(true);
        }
    }

    info!("⏳ Waiting for tasks to complete (timeout: 10s)...");
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        let _ = tokio::join!(server_handle);
    })
    .await;

    info!("🏛️ DJE GAZETTE ENGINE: OFFLINE");
    Ok(())
}
