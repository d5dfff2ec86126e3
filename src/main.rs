//! Rewrite Relay CLI
//!
//! Runs the HTTP relay, relays a single page to stdout, or validates a
//! websites document.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rewrite_relay::config::DEFAULT_SITES_PATH;
use rewrite_relay::server::{self, AppState};
use rewrite_relay::{build_relay, load_registry, RelayConfig};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "rewrite-relay")]
#[command(about = "Fetch pages with automatic login and rewrite them with XPath rules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP relay
    Serve {
        /// Websites document
        #[arg(short, long, default_value = DEFAULT_SITES_PATH)]
        config: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Per-request deadline in seconds (default: 60)
        #[arg(short, long, default_value = "60")]
        deadline: u64,
    },

    /// Relay a single URL and print the result
    Fetch {
        /// URL to relay
        #[arg(short, long)]
        url: String,

        /// Websites document
        #[arg(short, long, default_value = DEFAULT_SITES_PATH)]
        config: PathBuf,
    },

    /// Validate a websites document and list its sites
    Check {
        /// Websites document
        #[arg(short, long, default_value = DEFAULT_SITES_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG refines the default level
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Credentials usually come from the environment
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            deadline,
        } => {
            let config = RelayConfig::builder()
                .sites_path(config)
                .bind_addr(bind)
                .request_deadline_secs(deadline)
                .build();

            let relay = build_relay(&config)?;
            info!(
                "Serving {} configured sites",
                relay.registry().len()
            );

            let state = Arc::new(AppState {
                relay,
                request_deadline: config.request_deadline,
            });
            server::serve(config.bind_addr, state).await?;
        }

        Commands::Fetch { url, config } => {
            let config = RelayConfig::builder().sites_path(config).build();
            let relay = build_relay(&config)?;

            info!("Relaying: {}", url);
            let page = relay.fetch_and_transform(&url).await?;
            std::io::stdout().write_all(&page)?;
        }

        Commands::Check { config } => {
            let registry = load_registry(&config)?;

            println!("=== Sites ({}) ===", registry.len());
            for hostname in registry.hostnames() {
                let Some(site) = registry.lookup(hostname) else {
                    continue;
                };
                println!("  - {}", hostname);
                println!("      login: {}", site.login_url);
                println!(
                    "      probe: {}",
                    site.login_probe
                        .as_ref()
                        .map(|p| p.as_str())
                        .unwrap_or("(none, always logs in)")
                );
                println!(
                    "      fields: {}, strip rules: {}, move rules: {}",
                    site.credentials.len(),
                    site.strip_rules.len(),
                    site.move_rules.len()
                );
            }
        }
    }

    Ok(())
}
