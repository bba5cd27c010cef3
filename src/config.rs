use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default lock/unlock bridge on the source chain (Sepolia)
pub const DEFAULT_SOURCE_BRIDGE: &str = "0x05b315e576cbd50a5d3f4313a00ba31be20e495d";

/// Default mint/burn bridge on the destination chain (Base Sepolia)
pub const DEFAULT_DESTINATION_BRIDGE: &str = "0xe0af9d805d6cd555bd1e24627e6358ff45be9986";

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    /// Chain A: emits `EthLocked`, executes `unlockEth`
    pub source: ChainConfig,
    /// Chain B: emits `TokensBurned`, executes `mintTokens`
    pub destination: ChainConfig,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
    pub log_format: LogFormat,
}

/// One bridged chain
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Label used in logs and metrics
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub bridge_address: Address,
    /// First block to scan; the chain head when unset
    pub start_block: Option<u64>,
    pub finality_blocks: u64,
}

/// Signing key and timing of the relay loops
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
    pub poll_interval_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub dispatch_confirm_timeout_secs: u64,
    pub dispatch_confirm_attempts: u32,
    pub retry_interval_secs: u64,
    pub retry_confirm_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub status_sweep_interval_secs: u64,
    pub status_retention_secs: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("receipt_poll_interval_ms", &self.receipt_poll_interval_ms)
            .field(
                "dispatch_confirm_timeout_secs",
                &self.dispatch_confirm_timeout_secs,
            )
            .field("dispatch_confirm_attempts", &self.dispatch_confirm_attempts)
            .field("retry_interval_secs", &self.retry_interval_secs)
            .field("retry_confirm_timeout_secs", &self.retry_confirm_timeout_secs)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("status_sweep_interval_secs", &self.status_sweep_interval_secs)
            .field("status_retention_secs", &self.status_retention_secs)
            .finish()
    }
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// Query API listener
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

impl ApiConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(eyre!("LOG_FORMAT must be 'text' or 'json', got '{}'", other)),
        }
    }
}

/// Built-in identity of a chain slot
struct ChainDefaults {
    prefix: &'static str,
    name: &'static str,
    chain_id: u64,
    bridge_address: &'static str,
}

const SOURCE_DEFAULTS: ChainDefaults = ChainDefaults {
    prefix: "SOURCE",
    name: "sepolia",
    chain_id: 11155111,
    bridge_address: DEFAULT_SOURCE_BRIDGE,
};

const DESTINATION_DEFAULTS: ChainDefaults = ChainDefaults {
    prefix: "DESTINATION",
    name: "base-sepolia",
    chain_id: 84532,
    bridge_address: DEFAULT_DESTINATION_BRIDGE,
};

/// Default functions
fn default_port() -> u16 {
    3001
}

fn default_poll_interval() -> u64 {
    4000
}

fn default_receipt_poll_interval() -> u64 {
    2000
}

fn default_dispatch_confirm_timeout() -> u64 {
    60
}

fn default_dispatch_confirm_attempts() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    30
}

fn default_retry_confirm_timeout() -> u64 {
    90
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_status_sweep_interval() -> u64 {
    300
}

fn default_status_retention() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build and validate a configuration from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let private_key = vars.required("RELAYER_PRIVATE_KEY")?;
        let source = vars.chain(&SOURCE_DEFAULTS)?;
        let destination = vars.chain(&DESTINATION_DEFAULTS)?;

        let relayer = RelayerConfig {
            private_key,
            poll_interval_ms: vars.parse_or("POLL_INTERVAL_MS", default_poll_interval())?,
            receipt_poll_interval_ms: vars
                .parse_or("RECEIPT_POLL_INTERVAL_MS", default_receipt_poll_interval())?,
            dispatch_confirm_timeout_secs: vars.parse_or(
                "DISPATCH_CONFIRM_TIMEOUT_SECS",
                default_dispatch_confirm_timeout(),
            )?,
            dispatch_confirm_attempts: vars.parse_or(
                "DISPATCH_CONFIRM_ATTEMPTS",
                default_dispatch_confirm_attempts(),
            )?,
            retry_interval_secs: vars.parse_or("RETRY_INTERVAL_SECS", default_retry_interval())?,
            retry_confirm_timeout_secs: vars
                .parse_or("RETRY_CONFIRM_TIMEOUT_SECS", default_retry_confirm_timeout())?,
            max_retry_attempts: vars
                .parse_or("MAX_RETRY_ATTEMPTS", default_max_retry_attempts())?,
            status_sweep_interval_secs: vars
                .parse_or("STATUS_SWEEP_INTERVAL_SECS", default_status_sweep_interval())?,
            status_retention_secs: vars
                .parse_or("STATUS_RETENTION_SECS", default_status_retention())?,
        };

        let port = match vars.get("PORT").or_else(|| vars.get("RELAYER_PORT")) {
            Some(raw) => raw
                .parse::<u16>()
                .wrap_err("PORT must be a valid port number")?,
            None => default_port(),
        };
        let api = ApiConfig {
            bind_address: vars.get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
        };

        let log_format = match vars.get("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::Text,
        };

        let config = Config {
            source,
            destination,
            relayer,
            api,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate signing key
        let key = &self.relayer.private_key;
        if key.len() != 66
            || !key.starts_with("0x")
            || !key[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(eyre!(
                "RELAYER_PRIVATE_KEY must be 66 chars (0x + 64 hex chars)"
            ));
        }

        for chain in [&self.source, &self.destination] {
            if chain.rpc_url.is_empty() {
                return Err(eyre!("{} rpc_url cannot be empty", chain.name));
            }
            if !chain.rpc_url.starts_with("http://") && !chain.rpc_url.starts_with("https://") {
                return Err(eyre!(
                    "{} rpc_url must be an http(s) URL, got '{}'",
                    chain.name,
                    chain.rpc_url
                ));
            }
        }

        if self.source.chain_id == self.destination.chain_id {
            return Err(eyre!(
                "SOURCE_CHAIN_ID and DESTINATION_CHAIN_ID must differ (both {})",
                self.source.chain_id
            ));
        }

        let relayer = &self.relayer;
        for (name, value) in [
            ("POLL_INTERVAL_MS", relayer.poll_interval_ms),
            ("RECEIPT_POLL_INTERVAL_MS", relayer.receipt_poll_interval_ms),
            (
                "DISPATCH_CONFIRM_TIMEOUT_SECS",
                relayer.dispatch_confirm_timeout_secs,
            ),
            (
                "DISPATCH_CONFIRM_ATTEMPTS",
                relayer.dispatch_confirm_attempts as u64,
            ),
            ("RETRY_INTERVAL_SECS", relayer.retry_interval_secs),
            ("RETRY_CONFIRM_TIMEOUT_SECS", relayer.retry_confirm_timeout_secs),
            ("MAX_RETRY_ATTEMPTS", relayer.max_retry_attempts as u64),
            ("STATUS_SWEEP_INTERVAL_SECS", relayer.status_sweep_interval_secs),
            ("STATUS_RETENTION_SECS", relayer.status_retention_secs),
        ] {
            if value == 0 {
                return Err(eyre!("{} must be greater than 0", name));
            }
        }

        Ok(())
    }
}

/// Variable lookup with empty values treated as unset
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.get(name)
            .ok_or_else(|| eyre!("{} environment variable is required", name))
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(raw) => raw
                .parse()
                .wrap_err_with(|| format!("{} must be a valid number, got '{}'", name, raw)),
            None => Ok(default),
        }
    }

    fn chain(&self, defaults: &ChainDefaults) -> Result<ChainConfig> {
        let prefix = defaults.prefix;

        let bridge_raw = self
            .get(&format!("{}_BRIDGE_ADDRESS", prefix))
            .unwrap_or_else(|| defaults.bridge_address.to_string());
        if bridge_raw.len() != 42 || !bridge_raw.starts_with("0x") {
            return Err(eyre!(
                "{}_BRIDGE_ADDRESS must be a valid hex address (42 chars with 0x prefix)",
                prefix
            ));
        }
        let bridge_address = Address::from_str(&bridge_raw)
            .wrap_err_with(|| format!("{}_BRIDGE_ADDRESS is not a valid address", prefix))?;

        let start_block = match self.get(&format!("{}_START_BLOCK", prefix)) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .wrap_err_with(|| format!("{}_START_BLOCK must be a valid u64", prefix))?,
            ),
            None => None,
        };

        Ok(ChainConfig {
            name: self
                .get(&format!("{}_CHAIN_NAME", prefix))
                .unwrap_or_else(|| defaults.name.to_string()),
            rpc_url: self.required(&format!("{}_RPC_URL", prefix))?,
            chain_id: self.parse_or(&format!("{}_CHAIN_ID", prefix), defaults.chain_id)?,
            bridge_address,
            start_block,
            finality_blocks: self.parse_or(&format!("{}_FINALITY_BLOCKS", prefix), 0)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("RELAYER_PRIVATE_KEY", KEY.to_string()),
            ("SOURCE_RPC_URL", "http://localhost:8545".to_string()),
            ("DESTINATION_RPC_URL", "http://localhost:8546".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config> {
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = assert_ok!(load(&base_vars()));

        assert_eq!(config.source.name, "sepolia");
        assert_eq!(config.source.chain_id, 11155111);
        assert_eq!(
            config.source.bridge_address,
            Address::from_str(DEFAULT_SOURCE_BRIDGE).unwrap()
        );
        assert_eq!(config.source.start_block, None);
        assert_eq!(config.destination.name, "base-sepolia");
        assert_eq!(config.destination.chain_id, 84532);
        assert_eq!(config.api.port, default_port());
        assert_eq!(config.api.listen_addr(), "0.0.0.0:3001");
        assert_eq!(config.relayer.dispatch_confirm_timeout_secs, 60);
        assert_eq!(config.relayer.dispatch_confirm_attempts, 3);
        assert_eq!(config.relayer.retry_interval_secs, 30);
        assert_eq!(config.relayer.retry_confirm_timeout_secs, 90);
        assert_eq!(config.relayer.max_retry_attempts, 5);
        assert_eq!(config.relayer.status_sweep_interval_secs, 300);
        assert_eq!(config.relayer.status_retention_secs, 3600);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_required_variables() {
        for name in ["RELAYER_PRIVATE_KEY", "SOURCE_RPC_URL", "DESTINATION_RPC_URL"] {
            let mut vars = base_vars();
            vars.remove(name);
            let err = assert_err!(load(&vars));
            assert!(err.to_string().contains(name), "{}", err);

            let mut vars = base_vars();
            vars.insert(name, "  ".to_string());
            assert_err!(load(&vars));
        }
    }

    #[test]
    fn test_private_key_validation() {
        let mut vars = base_vars();
        vars.insert("RELAYER_PRIVATE_KEY", KEY.trim_start_matches("0x").to_string());
        assert_err!(load(&vars));

        vars.insert("RELAYER_PRIVATE_KEY", format!("0x{}", "zz".repeat(32)));
        assert_err!(load(&vars));
    }

    #[test]
    fn test_evm_address_validation() {
        let mut vars = base_vars();
        vars.insert("DESTINATION_BRIDGE_ADDRESS", "0x1234".to_string());
        assert_err!(load(&vars));

        vars.insert(
            "DESTINATION_BRIDGE_ADDRESS",
            "0x0000000000000000000000000000000000000001".to_string(),
        );
        let config = assert_ok!(load(&vars));
        assert_eq!(config.destination.bridge_address, Address::with_last_byte(1));
    }

    #[test]
    fn test_chain_ids_must_differ() {
        let mut vars = base_vars();
        vars.insert("SOURCE_CHAIN_ID", "31337".to_string());
        vars.insert("DESTINATION_CHAIN_ID", "31337".to_string());
        assert_err!(load(&vars));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        for name in ["RETRY_INTERVAL_SECS", "MAX_RETRY_ATTEMPTS", "DISPATCH_CONFIRM_ATTEMPTS"] {
            let mut vars = base_vars();
            vars.insert(name, "0".to_string());
            assert_err!(load(&vars));
        }
    }

    #[test]
    fn test_port_fallback_and_overrides() {
        let mut vars = base_vars();
        vars.insert("RELAYER_PORT", "4000".to_string());
        assert_eq!(assert_ok!(load(&vars)).api.port, 4000);

        vars.insert("PORT", "5000".to_string());
        vars.insert("SOURCE_START_BLOCK", "123".to_string());
        vars.insert("LOG_FORMAT", "JSON".to_string());
        let config = assert_ok!(load(&vars));
        assert_eq!(config.api.port, 5000);
        assert_eq!(config.source.start_block, Some(123));
        assert_eq!(config.log_format, LogFormat::Json);

        vars.insert("PORT", "not-a-port".to_string());
        assert_err!(load(&vars));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let config = assert_ok!(load(&base_vars()));
        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&KEY[2..]));
    }
}
