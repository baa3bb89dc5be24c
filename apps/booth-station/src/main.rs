use std::sync::Arc;

use anyhow::{Context, Result};
use booth_channel::WsConnector;
use booth_station::{
    capture::{open_device, CaptureEngine, Overlay},
    presenter,
    registry::SessionManager,
    telemetry, Cli, PairingCoordinator, StationConfig, StationHandle,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "commands: c = capture, m = multi-shot, n = new session, \
                    e = end session, d = download latest, q = quit";

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;
    let config = StationConfig::try_from(Cli::parse())?;
    info!(
        registry_url = %config.registry_url,
        relay_url = %config.relay_url,
        device = ?config.device,
        "starting booth station"
    );

    let device = open_device(&config.device).context("failed to set up capture device")?;
    let overlay = config
        .overlay
        .as_deref()
        .map(Overlay::load)
        .transpose()
        .context("failed to load overlay")?;
    let sessions = SessionManager::new(config.registry_url.clone())?;
    let connector = Arc::new(WsConnector::new(config.relay_url.clone()));

    let station = PairingCoordinator::spawn(
        sessions,
        connector,
        CaptureEngine::new(device, overlay),
        config.timings,
    );
    tokio::spawn(presenter::run(station.subscribe()));

    if let Err(err) = station.start_session().await {
        warn!(error = %err, "could not start a session; press `n` to retry");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => {
                    if !handle_line(&station, &config, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    station.shutdown().await?;
    Ok(())
}

/// Returns `false` when the operator asked to quit.
async fn handle_line(station: &StationHandle, config: &StationConfig, line: &str) -> bool {
    let result = match line {
        "c" => station.capture_now().await.map(|accepted| {
            if !accepted {
                println!("capture ignored: no remote paired or a capture is running");
            }
        }),
        "m" => station.capture_batch(config.batch_size).await.map(|report| {
            println!(
                "batch: {} captured, {} failed, {} not started",
                report.captured, report.failed, report.not_started
            );
        }),
        "n" => station.start_session().await.map(|_| ()),
        "e" => station.end_session().await,
        "d" => station
            .save_latest(&config.output_dir)
            .await
            .map(|saved| match saved {
                Some(path) => println!("saved {}", path.display()),
                None => println!("nothing to save yet"),
            }),
        "q" => return false,
        "" => Ok(()),
        _ => {
            println!("{HELP}");
            Ok(())
        }
    };
    if let Err(err) = result {
        warn!(error = %err, command = line, "command failed");
    }
    true
}
