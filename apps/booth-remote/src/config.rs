use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use booth_proto::{relay_url_for, session_id_from_url};
use clap::Parser;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "booth-remote",
    author,
    version,
    about = "Handheld remote for a paired photo booth station"
)]
pub struct Cli {
    /// Pairing link shown by the station (`.../mobile/<session-id>`).
    #[arg(env = "BOOTH_REMOTE_PAIRING_URL")]
    pub pairing_url: String,

    /// Relay WebSocket endpoint. Derived from the pairing link when omitted.
    #[arg(long, env = "BOOTH_REMOTE_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Where received photos are written.
    #[arg(long, env = "BOOTH_REMOTE_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// How long to wait for the relay to accept the join.
    #[arg(long, env = "BOOTH_REMOTE_JOIN_TIMEOUT_SECS", default_value_t = 5)]
    pub join_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub pairing_url: String,
    pub session_id: String,
    pub relay_url: Url,
    pub output_dir: PathBuf,
    pub join_timeout: Duration,
}

impl TryFrom<Cli> for RemoteConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let pairing_url = cli.pairing_url.trim().to_string();
        let session_id = session_id_from_url(&pairing_url)
            .with_context(|| format!("not a pairing link: {pairing_url}"))?;

        let relay_url = match cli.relay_url {
            Some(raw) => {
                let url = Url::parse(raw.trim())
                    .with_context(|| format!("invalid relay url: {raw}"))?;
                if !matches!(url.scheme(), "ws" | "wss") {
                    bail!("relay url must be ws or wss: {url}");
                }
                url
            }
            None => relay_url_for(&pairing_url)
                .context("failed to derive relay url from pairing link")?,
        };

        if cli.join_timeout_secs == 0 {
            bail!("join timeout must be at least one second");
        }

        Ok(RemoteConfig {
            pairing_url,
            session_id,
            relay_url,
            output_dir: cli.output_dir,
            join_timeout: Duration::from_secs(cli.join_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn relay_is_derived_from_pairing_link() {
        let cli = Cli::try_parse_from(["booth-remote", "https://booth.example/mobile/abc123"])
            .unwrap();
        let config = RemoteConfig::try_from(cli).unwrap();
        assert_eq!(config.session_id, "abc123");
        assert_eq!(config.relay_url.as_str(), "wss://booth.example/ws");
        assert_eq!(config.join_timeout, Duration::from_secs(5));
    }

    #[test_timeout::timeout]
    fn explicit_relay_overrides_derivation() {
        let cli = Cli::try_parse_from([
            "booth-remote",
            "http://10.0.0.2:8080/mobile/abc123",
            "--relay-url",
            "ws://10.0.0.3:9000/ws",
        ])
        .unwrap();
        let config = RemoteConfig::try_from(cli).unwrap();
        assert_eq!(config.relay_url.as_str(), "ws://10.0.0.3:9000/ws");
    }

    #[test_timeout::timeout]
    fn links_without_session_are_rejected() {
        for link in ["https://booth.example/", "not a url", "https://booth.example/mobile/"] {
            let cli = Cli::try_parse_from(["booth-remote", link]).unwrap();
            assert!(RemoteConfig::try_from(cli).is_err(), "accepted {link}");
        }
    }
}
