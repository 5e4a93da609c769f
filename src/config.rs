//! Configuration management for the HTLC relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::address::{to_canonical, CanonicalAddress, ChainFamily, Create2Prefix};
use crate::order::{AuctionDetails, OrderOptions, DEFAULT_SAFETY_DEPOSIT_WEI};
use crate::resolver::ResolverConfig;
use crate::swap::OrchestratorConfig;
use crate::timelock::TimelockSchedule;

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "HTLC_RELAYER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub chains: ChainsConfig,
    #[serde(default)]
    pub order: OrderDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub poll_interval_ms: u64,
    pub event_timeout_secs: u64,
    pub max_wait_rounds: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    #[serde(default = "default_window_margin")]
    pub window_margin_secs: u64,
    /// Per-request timeout for chain RPC calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub journal_dir: PathBuf,
}

fn default_window_margin() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// The two chains a swap bridges. Which one is the source is chosen per swap.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainsConfig {
    pub src: ChainConfig,
    pub dst: ChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub family: ChainFamily,
    pub chain_id: u64,
    /// JSON-RPC endpoints for EVM chains; the TronGrid base URL first for Tron
    pub rpc_urls: Vec<String>,
    pub api_key: Option<String>,
    /// Native-form addresses
    pub resolver: String,
    pub escrow_factory: String,
    pub limit_order_protocol: String,
    /// Asset the maker trades on this chain; zero address for the native coin
    pub token: String,
    /// Named assets selectable per swap, symbol to native address
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    /// CREATE2 prefix byte; the family default when absent
    pub create2_prefix: Option<u8>,
    /// Environment variable holding the resolver's signing key
    pub private_key_env: String,
    /// Environment variable holding the maker's key when this chain is the
    /// source; `order.maker_private_key_env` when absent
    pub maker_private_key_env: Option<String>,
    #[serde(default = "default_confirmations")]
    pub confirmation_blocks: usize,
    /// Tron energy fee limit in SUN
    #[serde(default = "default_fee_limit")]
    pub fee_limit: u64,
}

fn default_confirmations() -> usize {
    1
}

fn default_fee_limit() -> u64 {
    1_000_000_000
}

/// Defaults applied to orders created from the CLI
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderDefaults {
    pub time_locks: TimelockSchedule,
    pub src_safety_deposit_wei: u64,
    pub dst_safety_deposit_wei: u64,
    pub auction_duration_secs: u64,
    /// Environment variable holding the maker's signing key
    pub maker_private_key_env: String,
}

impl Default for OrderDefaults {
    fn default() -> Self {
        Self {
            time_locks: TimelockSchedule::default(),
            src_safety_deposit_wei: DEFAULT_SAFETY_DEPOSIT_WEI,
            dst_safety_deposit_wei: DEFAULT_SAFETY_DEPOSIT_WEI,
            auction_duration_secs: AuctionDetails::default().duration,
            maker_private_key_env: "MAKER_PRIVATE_KEY".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `HTLC_RELAYER_CONFIG`, or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        Self::parse(&config_str)
    }

    /// Parse and validate a TOML document
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.relayer.poll_interval_ms == 0 {
            anyhow::bail!("relayer.poll_interval_ms must be positive");
        }
        if self.relayer.event_timeout_secs * 1000 <= self.relayer.poll_interval_ms {
            anyhow::bail!("relayer.event_timeout_secs must exceed the poll interval");
        }
        if self.relayer.request_timeout_secs == 0 {
            anyhow::bail!("relayer.request_timeout_secs must be positive");
        }
        if self.relayer.max_wait_rounds == 0 {
            anyhow::bail!("relayer.max_wait_rounds must be at least 1");
        }

        if self.chains.src.chain_id == self.chains.dst.chain_id {
            anyhow::bail!(
                "chains.src and chains.dst share chain id {}",
                self.chains.src.chain_id
            );
        }
        for chain in [&self.chains.src, &self.chains.dst] {
            chain.validate()?;
        }

        self.order
            .time_locks
            .validate()
            .with_context(|| "Invalid order.time_locks")?;

        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            submit_retries: self.relayer.max_retries,
            retry_backoff: Duration::from_millis(self.relayer.retry_delay_ms),
            max_wait_rounds: self.relayer.max_wait_rounds,
            window_margin: Duration::from_secs(self.relayer.window_margin_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.relayer.poll_interval_ms)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.relayer.event_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.relayer.request_timeout_secs)
    }

    /// Environment variable holding the maker key for orders sourced on `chain`
    pub fn maker_key_env<'a>(&'a self, chain: &'a ChainConfig) -> &'a str {
        chain
            .maker_private_key_env
            .as_deref()
            .unwrap_or(&self.order.maker_private_key_env)
    }

    /// Maker signing key for orders sourced on `chain`
    pub fn maker_private_key(&self, chain: &ChainConfig) -> Result<String> {
        let var = self.maker_key_env(chain);
        env::var(var).with_context(|| {
            format!(
                "Chain {}: maker key environment variable {} is not set",
                chain.name, var
            )
        })
    }
}

impl ChainConfig {
    fn validate(&self) -> Result<()> {
        if self.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.name);
        }
        if self.private_key_env.is_empty() {
            anyhow::bail!("Chain {} has no private_key_env configured", self.name);
        }
        self.resolver_config()?;
        self.token()?;
        for symbol in self.tokens.keys() {
            self.asset(symbol)?;
        }
        if self.create2_prefix.is_some() && self.create2_prefix != Some(self.default_prefix().0) {
            tracing::warn!(
                "Chain {} overrides the {} CREATE2 prefix with {:#04x}",
                self.name,
                self.family,
                self.create2_prefix.unwrap_or_default()
            );
        }
        Ok(())
    }

    fn default_prefix(&self) -> Create2Prefix {
        Create2Prefix::default_for(self.family)
    }

    pub fn create2_prefix(&self) -> Create2Prefix {
        self.create2_prefix
            .map(Create2Prefix)
            .unwrap_or_else(|| self.default_prefix())
    }

    fn address(&self, field: &str, native: &str) -> Result<CanonicalAddress> {
        to_canonical(native, self.family)
            .with_context(|| format!("Chain {}: invalid {}", self.name, field))
    }

    pub fn resolver_config(&self) -> Result<ResolverConfig> {
        Ok(ResolverConfig {
            family: self.family,
            resolver: self.address("resolver", &self.resolver)?,
            escrow_factory: self.address("escrow_factory", &self.escrow_factory)?,
            limit_order_protocol: self
                .address("limit_order_protocol", &self.limit_order_protocol)?,
            create2_prefix: self.create2_prefix(),
        })
    }

    pub fn token(&self) -> Result<CanonicalAddress> {
        self.address("token", &self.token)
    }

    /// A symbol from `tokens`, or a native address
    pub fn asset(&self, symbol_or_address: &str) -> Result<CanonicalAddress> {
        match self.tokens.get(symbol_or_address) {
            Some(native) => self.address(&format!("tokens.{}", symbol_or_address), native),
            None => self.address("asset", symbol_or_address),
        }
    }

    /// Signing key named by `private_key_env`
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.private_key_env).with_context(|| {
            format!(
                "Chain {}: environment variable {} is not set",
                self.name, self.private_key_env
            )
        })
    }
}

impl OrderDefaults {
    pub fn options(&self) -> OrderOptions {
        OrderOptions {
            time_locks: self.time_locks,
            src_safety_deposit: U256::from(self.src_safety_deposit_wei),
            dst_safety_deposit: U256::from(self.dst_safety_deposit_wei),
            auction: AuctionDetails {
                duration: self.auction_duration_secs,
                ..AuctionDetails::default()
            },
            ..OrderOptions::default()
        }
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
