use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use booth_channel::HubConfig;
use clap::Parser;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "booth-relay",
    author,
    version,
    about = "Session registry and relay channel for booth pairing"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "BOOTH_RELAY_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Public base URL used when minting pairing links. Defaults to
    /// `http://<listen_addr>`.
    #[arg(long, env = "BOOTH_RELAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Sessions without protocol traffic for this long are expired.
    #[arg(long, env = "BOOTH_RELAY_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    pub idle_timeout_secs: u64,

    #[arg(long, env = "BOOTH_RELAY_RECYCLE_INTERVAL_SECS", default_value_t = 30)]
    pub recycle_interval_secs: u64,

    /// Maximum time clients have to send their join frame.
    #[arg(long, env = "BOOTH_RELAY_HANDSHAKE_TIMEOUT_SECS", default_value_t = 5)]
    pub handshake_timeout_secs: u64,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BOOTH_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub hub: HubConfig,
    pub shutdown_grace: Duration,
}

impl TryFrom<Cli> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;

        let public_url = cli
            .public_url
            .unwrap_or_else(|| format!("http://{listen_addr}"));
        let parsed = Url::parse(&public_url)
            .with_context(|| format!("invalid public url: {public_url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("public url must be http or https: {public_url}");
        }
        if cli.idle_timeout_secs == 0 || cli.recycle_interval_secs == 0 {
            bail!("idle timeout and recycle interval must be positive");
        }

        Ok(RelayConfig {
            listen_addr,
            hub: HubConfig {
                public_base_url: public_url,
                idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
                recycle_interval: Duration::from_secs(cli.recycle_interval_secs),
                handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
            },
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_match_pairing_protocol() {
        let cli = Cli::try_parse_from(["booth-relay"]).unwrap();
        let config = RelayConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.hub.public_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.hub.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.hub.handshake_timeout, Duration::from_secs(5));
    }

    #[test_timeout::timeout]
    fn rejects_bad_addresses_and_urls() {
        let cli = Cli::try_parse_from(["booth-relay", "--listen-addr", "nowhere"]).unwrap();
        assert!(RelayConfig::try_from(cli).is_err());

        let cli =
            Cli::try_parse_from(["booth-relay", "--public-url", "ftp://booth.example"]).unwrap();
        assert!(RelayConfig::try_from(cli).is_err());

        let cli = Cli::try_parse_from(["booth-relay", "--idle-timeout-secs", "0"]).unwrap();
        assert!(RelayConfig::try_from(cli).is_err());
    }

    #[test_timeout::timeout]
    fn public_url_overrides_listen_address() {
        let cli = Cli::try_parse_from([
            "booth-relay",
            "--listen-addr",
            "0.0.0.0:9000",
            "--public-url",
            "https://booth.example",
        ])
        .unwrap();
        let config = RelayConfig::try_from(cli).unwrap();
        assert_eq!(config.hub.public_base_url, "https://booth.example");
    }
}
