use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use booth_channel::WsConnector;
use booth_proto::ImageData;
use booth_remote::{telemetry, Cli, RemoteConfig, RemoteCoordinator, RemoteEvent};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "commands: c = take photo, e = end session, q = quit";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    telemetry::init()?;
    let config = RemoteConfig::try_from(Cli::parse())?;
    let connector = WsConnector::new(config.relay_url.clone()).with_join_timeout(config.join_timeout);

    let mut remote = match RemoteCoordinator::connect(&connector, &config.pairing_url).await {
        Ok(remote) => remote,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("connected to session {}", remote.session_id());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = remote.next_event() => match event {
                Some(RemoteEvent::ImageReceived(image)) => {
                    match save_image(&config.output_dir, &image).await {
                        Ok(path) => println!("photo saved to {}", path.display()),
                        Err(err) => warn!(error = %err, "could not save photo"),
                    }
                }
                Some(RemoteEvent::DeviceError(message)) => {
                    println!("the station could not take the photo: {message}");
                }
                Some(RemoteEvent::SessionEnded(reason)) => {
                    println!("session ended ({reason:?})");
                    break;
                }
                Some(RemoteEvent::ConnectionLost) | None => {
                    println!("connection to the station was lost");
                    break;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "c" => match remote.request_capture() {
                        Ok(()) => println!("get ready..."),
                        Err(err) => warn!(error = %err, "capture request failed"),
                    },
                    "e" => {
                        if let Err(err) = remote.end_session() {
                            warn!(error = %err, "could not end session");
                        }
                        // Give the socket task a moment to flush end_session.
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        break;
                    }
                    "q" => break,
                    "" => {}
                    _ => println!("{HELP}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!(state = ?remote.state(), "remote exiting");
    Ok(ExitCode::SUCCESS)
}

async fn save_image(dir: &Path, image: &ImageData) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("booth-photo-{millis}.{}", image.extension()));
    tokio::fs::write(&path, &image.bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
