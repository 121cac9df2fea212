//! QuickView relay entry point.
//!
//! ```text
//! qv-proxy                        Run in the foreground
//! qv-proxy --config <path>        Load a custom config TOML
//! qv-proxy --listen <addr> ...    Override the listen addresses
//! qv-proxy --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qv_proxy::config::RelayConfig;
use qv_proxy::service::ProxyService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "qv-proxy", about = "QuickView desktop/web rendezvous relay")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "qv-proxy.toml")]
    config: PathBuf,

    /// Address to listen on; may be repeated. Overrides the config file.
    #[arg(short, long = "listen", value_name = "ADDR")]
    listen: Vec<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RelayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = RelayConfig::load(&cli.config);
    config.override_listen(cli.listen);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("qv-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("listening on: {}", config.network.listen_addrs.join(", "));
    info!("supported desktop version: {}", config.protocol.supported_version);
    info!("registration log: {}", config.registry.log_path.display());

    let service = ProxyService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
