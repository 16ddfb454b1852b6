use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use chatrelay_bridge::{ConnectionManager, RelayRouter};
use chatrelay_core::settings::{self, RelaySettings};
use chatrelay_surface::cdp::CdpSession;
use chatrelay_surface::page::CdpChatPage;

/// Relay between a local control channel and a driven chat page.
#[derive(Parser)]
#[command(name = "chatrelay")]
struct Args {
    /// Path to a settings JSON file (defaults to ~/.chatrelay/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let relay_settings: RelaySettings = match &args.settings {
        Some(path) => settings::load_settings_from_path(path)?,
        None => settings::load_settings()?,
    };

    tracing::info!(
        control = %relay_settings.control.url,
        cdp = %format!("{}:{}", relay_settings.surface.cdp_host, relay_settings.surface.cdp_port),
        "starting chatrelay"
    );

    let session = CdpSession::attach(
        &relay_settings.surface.cdp_host,
        relay_settings.surface.cdp_port,
    )
    .await?;
    let page = Arc::new(CdpChatPage::new(Arc::new(session), &relay_settings.surface));

    let (manager, inbound) = ConnectionManager::new(&relay_settings.control);
    let router = RelayRouter::new(page, manager.outbound(), &relay_settings);
    let _router = router.spawn(inbound);

    manager.connect();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    manager.shutdown();
    Ok(())
}
