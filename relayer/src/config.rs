//! Configuration management for the steward relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::ConfirmationPolicy;
use crate::tx::TxType;

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub sender: SenderConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
}

/// Everything the transaction sender needs to drive one signing key
/// against one endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    /// RPC URL of the chain node
    pub endpoint: String,
    /// Transaction shape for new submissions
    pub tx_type: TxType,
    /// When a receipt counts as deep enough
    pub confirmations: ConfirmationPolicy,
    /// Minimum blocks between broadcast and resubmission eligibility
    pub escalate_blocks: u64,
    /// Rational escalation factor, e.g. 110/100 = +10%
    pub escalate_multiple_num: u64,
    pub escalate_multiple_den: u64,
    /// Fee floors and ceiling, wei
    pub min_gas_tip: u64,
    pub min_gas_price: u64,
    pub max_gas_price: u64,
    /// Interval of the background check loop
    pub check_period_ms: u64,
    /// Resubmission cap per context before the sender stops escalating
    pub max_check_retries: u64,
    /// Row limit per check pass
    #[serde(default = "default_check_batch_size")]
    pub check_batch_size: u64,
}

fn default_check_batch_size() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    pub private_key_env: String,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("STEWARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.sender.validate().map_err(anyhow::Error::msg)?;

        Ok(settings)
    }
}

impl SenderConfig {
    /// Validate the sender configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("sender.endpoint must not be empty".into());
        }
        if self.escalate_multiple_den == 0 {
            return Err("sender.escalate_multiple_den must not be zero".into());
        }
        if self.escalate_multiple_num < self.escalate_multiple_den {
            return Err("sender.escalate_multiple_num must be >= escalate_multiple_den".into());
        }
        if self.max_gas_price == 0 {
            return Err("sender.max_gas_price must not be zero".into());
        }
        if self.check_period_ms == 0 {
            return Err("sender.check_period_ms must not be zero".into());
        }
        Ok(())
    }

    /// Escalation policy derived from the fee bounds
    pub fn escalation_policy(&self) -> crate::tx::EscalationPolicy {
        crate::tx::EscalationPolicy {
            num: self.escalate_multiple_num,
            den: self.escalate_multiple_den,
            max_gas_price: U256::from(self.max_gas_price),
            min_gas_tip: U256::from(self.min_gas_tip),
            min_gas_price: U256::from(self.min_gas_price),
        }
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
