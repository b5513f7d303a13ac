//! Dealer account gateway
//!
//! Connects to the ledger with the configured identity and serves the
//! account API over HTTP. Ledger settings come from the environment
//! (`PEER_ENDPOINT`, `MSP_ID`, `CERT_PATH`, ...).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use dealer_gateway::api;
use dealer_gateway::client::transport::HttpsTransport;
use dealer_gateway::client::Gateway;
use dealer_gateway::config::{parse_listen_addr, GatewayConfig};
use dealer_gateway::identity::SigningIdentity;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "dealer-gateway")]
#[command(about = "HTTP gateway for the dealer account ledger", long_about = None)]
struct Cli {
    /// Address the HTTP API listens on
    #[arg(long, env = "API_ADDR", value_parser = parse_listen_addr)]
    api_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dealer_gateway=debug,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = GatewayConfig::from_env().context("loading configuration")?;
    let api_addr = cli.api_addr.unwrap_or(config.api_addr);

    let signer = SigningIdentity::load(&config.msp_id, &config.cert_path, &config.key_path)
        .context("loading signing identity")?;
    let tls_ca = std::fs::read(&config.tls_cert_path)
        .with_context(|| format!("reading {}", config.tls_cert_path.display()))?;
    let transport = HttpsTransport::connect(&config.peer_endpoint, &config.gateway_peer, &tls_ca)
        .await
        .context("connecting to ledger peer")?;

    let gateway = Gateway::connect(signer, transport, config.options)?;
    let network = gateway.network(config.channel_name.as_str());
    let contract = network.contract(config.chaincode_name.as_str());
    tracing::info!(
        channel = %network.channel(),
        chaincode = %contract.name(),
        options = ?gateway.options(),
        "Contract bound"
    );
    let app = api::router(Arc::new(contract));

    let listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("binding {api_addr}"))?;
    tracing::info!(%api_addr, "Serving account API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
