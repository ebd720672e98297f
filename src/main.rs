use anyhow::Context;
use biosensor_link::domain::settings::SettingsService;
use biosensor_link::infrastructure::bluetooth::BtleplugTransport;
use biosensor_link::infrastructure::logging;
use biosensor_link::presentation::Console;
use biosensor_link::session::SessionService;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get();
    let _log_guard = logging::init_logger(&settings.log_settings)?;

    info!("Starting Biosensor Link");
    info!("Settings loaded from {}", settings_service.path().display());

    let config = settings.session_config()?;
    let transport = BtleplugTransport::new()
        .await
        .context("Failed to open Bluetooth adapter")?;
    info!("Target device: {}", config.device_address);

    let console = Console::new(SessionService::new(Arc::new(transport), config));
    console
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    info!("Shutting down");
    Ok(())
}
