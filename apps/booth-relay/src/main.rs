use anyhow::Result;
use booth_relay::{telemetry::Telemetry, Cli, RelayConfig};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = RelayConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        public_url = %config.hub.public_base_url,
        idle_timeout_secs = config.hub.idle_timeout.as_secs(),
        "starting booth relay"
    );

    booth_relay::run(config, Some(telemetry.metrics_handle())).await
}
