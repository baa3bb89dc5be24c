use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use booth_proto::relay_url_for;
use clap::Parser;
use url::Url;

/// Timings of the pairing protocol. Production uses the defaults; tests may
/// shorten them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTimings {
    /// Number of countdown steps shown before the shutter fires.
    pub countdown_ticks: u8,
    pub tick: Duration,
    /// "Just captured" settle period before the next request is accepted.
    pub cooldown: Duration,
    /// Delay between a session ending and the automatic renewal.
    pub renewal_delay: Duration,
    /// Pause between shots of a multi-shot batch.
    pub batch_settle: Duration,
}

impl Default for SequenceTimings {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            tick: Duration::from_secs(1),
            cooldown: Duration::from_millis(1500),
            renewal_delay: Duration::from_secs(1),
            batch_settle: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    TestPattern { width: u32, height: u32 },
    StillImage(PathBuf),
    Webcam { index: u32 },
}

impl FromStr for DeviceSelection {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw == "test-pattern" {
            return Ok(DeviceSelection::TestPattern {
                width: 640,
                height: 480,
            });
        }
        if let Some(path) = raw.strip_prefix("still:") {
            if path.is_empty() {
                bail!("still device needs a file path");
            }
            return Ok(DeviceSelection::StillImage(PathBuf::from(path)));
        }
        if raw == "webcam" {
            return Ok(DeviceSelection::Webcam { index: 0 });
        }
        if let Some(index) = raw.strip_prefix("webcam:") {
            let index = index
                .parse()
                .with_context(|| format!("invalid webcam index: {index}"))?;
            return Ok(DeviceSelection::Webcam { index });
        }
        bail!("unknown device `{raw}` (expected test-pattern, still:<path> or webcam[:index])")
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "booth-station",
    author,
    version,
    about = "Capture station for remote-triggered photo booths"
)]
pub struct Cli {
    /// Base URL of the session registry.
    #[arg(long, env = "BOOTH_STATION_REGISTRY_URL", default_value = "http://127.0.0.1:8080")]
    pub registry_url: String,

    /// Relay WebSocket endpoint. Derived from the registry URL when omitted.
    #[arg(long, env = "BOOTH_STATION_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Capture device: `test-pattern`, `still:<path>` or `webcam[:index]`.
    #[arg(long, env = "BOOTH_STATION_DEVICE", default_value = "test-pattern")]
    pub device: String,

    /// PNG frame composited over every capture.
    #[arg(long, env = "BOOTH_STATION_OVERLAY")]
    pub overlay: Option<PathBuf>,

    /// Where saved photos are written.
    #[arg(long, env = "BOOTH_STATION_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Shots taken by a multi-shot batch.
    #[arg(long, env = "BOOTH_STATION_BATCH_SIZE", default_value_t = 3)]
    pub batch_size: u32,
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub registry_url: Url,
    pub relay_url: Url,
    pub device: DeviceSelection,
    pub overlay: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub batch_size: u32,
    pub timings: SequenceTimings,
}

impl TryFrom<Cli> for StationConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let mut registry_url = Url::parse(cli.registry_url.trim())
            .with_context(|| format!("invalid registry url: {}", cli.registry_url))?;
        if !matches!(registry_url.scheme(), "http" | "https") {
            bail!("registry url must be http or https: {registry_url}");
        }
        // Endpoints are joined relative to this, which drops a last segment
        // without a trailing slash.
        if !registry_url.path().ends_with('/') {
            let path = format!("{}/", registry_url.path());
            registry_url.set_path(&path);
        }

        let relay_url = match cli.relay_url {
            Some(raw) => {
                let url = Url::parse(raw.trim())
                    .with_context(|| format!("invalid relay url: {raw}"))?;
                if !matches!(url.scheme(), "ws" | "wss") {
                    bail!("relay url must be ws or wss: {url}");
                }
                url
            }
            None => relay_url_for(registry_url.as_str())
                .context("failed to derive relay url from registry url")?,
        };

        if cli.batch_size == 0 {
            bail!("batch size must be at least one");
        }

        Ok(StationConfig {
            registry_url,
            relay_url,
            device: cli.device.parse()?,
            overlay: cli.overlay,
            output_dir: cli.output_dir,
            batch_size: cli.batch_size,
            timings: SequenceTimings::default(),
        })
    }
}
