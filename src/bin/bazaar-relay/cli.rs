//! Command-line interface definition.

use bazaar_relay::config::{RelayConfig, UnknownKindPolicy};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Payment-gated Nostr relay for auction and bid events.
#[derive(Parser, Debug)]
#[command(name = "bazaar-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory for relay data.
    #[arg(long, env = "BAZAAR_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// Address the HTTP server binds to.
    #[arg(long, short, env = "BAZAAR_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Public base URL of the relay (used for payment callbacks).
    #[arg(long, env = "RELAY_URL")]
    pub relay_url: Option<String>,

    /// Price per event in satoshis (0 disables payment gating).
    #[arg(long, env = "TICKET_PRICE_SATS")]
    pub price_sats: Option<u64>,

    /// ZEBEDEE API key.
    #[arg(long, env = "ZBD_API_KEY", hide_env_values = true)]
    pub zbd_api_key: Option<String>,

    /// ZEBEDEE API base URL.
    #[arg(long, env = "ZBD_API_BASE")]
    pub zbd_api_base: Option<String>,

    /// Seconds before an unpaid charge expires.
    #[arg(long, env = "BAZAAR_CHARGE_TTL_SECS")]
    pub charge_ttl_secs: Option<u64>,

    /// What to do with kinds that have no validator when gating is off.
    #[arg(long, value_enum, env = "BAZAAR_UNKNOWN_KINDS")]
    pub unknown_kinds: Option<CliUnknownKinds>,

    /// Path of the pending-charge snapshot (in-memory if unset).
    #[arg(long, env = "BAZAAR_LEDGER_PATH")]
    pub ledger_path: Option<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Unknown-kind policy CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliUnknownKinds {
    /// Store events of unknown kinds.
    Accept,
    /// Refuse events of unknown kinds.
    Reject,
}

impl Cli {
    /// Convert CLI arguments into a `RelayConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<RelayConfig> {
        // Start with default config or load from file
        let mut config = if let Some(ref path) = self.config {
            RelayConfig::from_file(path)?
        } else {
            RelayConfig::default()
        };

        // Override with CLI arguments
        if let Some(root_dir) = self.root_dir {
            config.root_dir = root_dir;
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(relay_url) = self.relay_url {
            config.relay_url = relay_url;
        }
        if let Some(unknown_kinds) = self.unknown_kinds {
            config.unknown_kinds = unknown_kinds.into();
        }
        config.log_level = self.log_level;

        // Payment config
        if let Some(price_sats) = self.price_sats {
            config.payment.price_sats = price_sats;
        }
        if let Some(api_key) = self.zbd_api_key {
            config.payment.api_key = api_key;
        }
        if let Some(api_base) = self.zbd_api_base {
            config.payment.api_base = api_base;
        }
        if let Some(ttl) = self.charge_ttl_secs {
            config.payment.charge_ttl_secs = ttl;
        }

        // Ledger config
        if let Some(path) = self.ledger_path {
            config.ledger.path = Some(path);
        }

        Ok(config)
    }
}

impl From<CliUnknownKinds> for UnknownKindPolicy {
    fn from(p: CliUnknownKinds) -> Self {
        match p {
            CliUnknownKinds::Accept => Self::Accept,
            CliUnknownKinds::Reject => Self::Reject,
        }
    }
}
