//! Configuration for bazaar-relay.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// What to do with event kinds that have no registered validator while
/// payment gating is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKindPolicy {
    /// Store them.
    #[default]
    Accept,
    /// Refuse them.
    Reject,
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Root directory for relay data.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Public base URL of the relay, used to build webhook callback URLs.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Relay name (NIP-11).
    #[serde(default = "default_name")]
    pub name: String,

    /// Relay description (NIP-11).
    #[serde(default = "default_description")]
    pub description: String,

    /// Policy for kinds without a validator.
    #[serde(default)]
    pub unknown_kinds: UnknownKindPolicy,

    /// Payment configuration.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Pending-payment ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Payment gating configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Price per event in satoshis. Zero disables gating.
    #[serde(default)]
    pub price_sats: u64,

    /// API key for the payment provider.
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the payment provider API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Description attached to each charge.
    #[serde(default = "default_charge_description")]
    pub charge_description: String,

    /// Timeout for provider requests, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Lifetime of a pending charge, in seconds.
    #[serde(default = "default_charge_ttl")]
    pub charge_ttl_secs: u64,

    /// Interval of the expiry sweep, in seconds. Zero disables the sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Pending-payment ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Snapshot file. `None` keeps the ledger in memory only.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How many resolved charge references to remember.
    #[serde(default = "default_resolved_capacity")]
    pub resolved_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            listen: default_listen(),
            relay_url: default_relay_url(),
            name: default_name(),
            description: default_description(),
            unknown_kinds: UnknownKindPolicy::default(),
            payment: PaymentConfig::default(),
            ledger: LedgerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            price_sats: 0,
            api_key: String::new(),
            api_base: default_api_base(),
            charge_description: default_charge_description(),
            request_timeout_secs: default_request_timeout(),
            charge_ttl_secs: default_charge_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            resolved_capacity: default_resolved_capacity(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "bazaar-relay")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bazaar-relay"))
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3334))
}

fn default_relay_url() -> String {
    "http://localhost:3334".to_string()
}

fn default_name() -> String {
    "JustBazar Relay".to_string()
}

fn default_description() -> String {
    "Relay to store paid auction and bid events".to_string()
}

fn default_api_base() -> String {
    "https://api.zebedee.io".to_string()
}

fn default_charge_description() -> String {
    "Relay event admission".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_request_timeout() -> u64 {
    15
}

const fn default_charge_ttl() -> u64 {
    3600
}

const fn default_sweep_interval() -> u64 {
    60
}

const fn default_resolved_capacity() -> usize {
    10_000
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings that would make the relay misbehave at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] describing the first problem found.
    pub fn validate(&self) -> crate::Result<()> {
        if self.payment.price_sats > 0 && self.payment.api_key.trim().is_empty() {
            return Err(crate::Error::Config(
                "payment.api_key is required when payment.price_sats > 0".to_string(),
            ));
        }
        if !self.relay_url.starts_with("http://") && !self.relay_url.starts_with("https://") {
            return Err(crate::Error::Config(format!(
                "relay_url must be an http(s) URL, got {:?}",
                self.relay_url
            )));
        }
        if self.payment.charge_ttl_secs == 0 {
            return Err(crate::Error::Config(
                "payment.charge_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
