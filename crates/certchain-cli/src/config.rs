//! CLI configuration management.
//!
//! Read from `~/.certchain/config.toml`, which is created with defaults on
//! first use. Command line flags override file values.

use anyhow::{bail, Context};
use certchain_core::{MiningConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted gas margin (percent).
const MAX_MARGIN_PERCENT: u32 = 1000;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// HTTP RPC endpoint
    pub rpc_url: String,
    /// WebSocket RPC endpoint, used for subscriptions
    pub ws_url: String,
    /// Request timeout (seconds)
    pub request_timeout_secs: u64,
    /// solc `--combined-json abi,bin` output
    pub artifact_path: PathBuf,
    /// Artifact key of the contract
    pub contract: String,
    /// File holding the deployed contract address
    pub address_file: PathBuf,
    /// Index into the node's account list
    pub account_index: usize,
    /// Passphrase of the sending account
    pub passphrase: String,
    pub unlock_duration_secs: u64,
    pub log_level: String,
    pub json_logs: bool,
    pub pipeline: PipelineSection,
    pub mining: MiningSection,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub deploy_margin_percent: u32,
    pub call_margin_percent: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
}

/// `[mining]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningSection {
    pub threads: u32,
    pub stop_on_shutdown: bool,
    pub resubscribe_attempts: u32,
    pub resubscribe_backoff_ms: u64,
}

fn certchain_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".certchain")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            ws_url: "ws://localhost:8546".to_string(),
            request_timeout_secs: 30,
            artifact_path: PathBuf::from("contract.json"),
            contract: certchain_core::STORAGE_CONTRACT.to_string(),
            address_file: certchain_dir().join("deployed_contract.txt"),
            account_index: 0,
            passphrase: String::new(),
            unlock_duration_secs: certchain_core::DEFAULT_UNLOCK_DURATION.as_secs(),
            log_level: "info".to_string(),
            json_logs: false,
            pipeline: PipelineSection::default(),
            mining: MiningSection::default(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            deploy_margin_percent: defaults.deploy_margin_percent,
            call_margin_percent: defaults.call_margin_percent,
            max_retries: defaults.max_retries,
            retry_backoff_ms: defaults.retry_backoff.as_millis() as u64,
            max_backoff_ms: defaults.max_backoff.as_millis() as u64,
            receipt_timeout_secs: defaults.receipt_timeout.as_secs(),
            receipt_poll_ms: defaults.receipt_poll_interval.as_millis() as u64,
        }
    }
}

impl Default for MiningSection {
    fn default() -> Self {
        let defaults = MiningConfig::default();
        Self {
            threads: defaults.threads,
            stop_on_shutdown: defaults.stop_on_shutdown,
            resubscribe_attempts: defaults.resubscribe_attempts,
            resubscribe_backoff_ms: defaults.resubscribe_backoff.as_millis() as u64,
        }
    }
}

impl CliConfig {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            let config = Self::default();
            config.save(&path)?;
            config
        };

        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Get configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".certchain").join("config.toml"))
    }

    /// Reject settings the pipeline or controller cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc_url.is_empty() {
            bail!("rpc_url must not be empty");
        }
        if self.mining.threads == 0 {
            bail!("mining.threads must be at least 1");
        }
        if self.pipeline.receipt_timeout_secs == 0 {
            bail!("pipeline.receipt_timeout_secs must be greater than zero");
        }
        if self.pipeline.receipt_poll_ms == 0 {
            bail!("pipeline.receipt_poll_ms must be greater than zero");
        }
        for (name, margin) in [
            ("deploy_margin_percent", self.pipeline.deploy_margin_percent),
            ("call_margin_percent", self.pipeline.call_margin_percent),
        ] {
            if margin > MAX_MARGIN_PERCENT {
                bail!("pipeline.{} is {}%, at most {}% allowed", name, margin, MAX_MARGIN_PERCENT);
            }
        }
        if self.unlock_duration_secs == 0 {
            bail!("unlock_duration_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            deploy_margin_percent: p.deploy_margin_percent,
            call_margin_percent: p.call_margin_percent,
            max_retries: p.max_retries,
            retry_backoff: Duration::from_millis(p.retry_backoff_ms),
            max_backoff: Duration::from_millis(p.max_backoff_ms),
            receipt_timeout: Duration::from_secs(p.receipt_timeout_secs),
            receipt_poll_interval: Duration::from_millis(p.receipt_poll_ms),
        }
    }

    pub fn mining_config(&self) -> MiningConfig {
        MiningConfig {
            threads: self.mining.threads,
            stop_on_shutdown: self.mining.stop_on_shutdown,
            resubscribe_attempts: self.mining.resubscribe_attempts,
            resubscribe_backoff: Duration::from_millis(self.mining.resubscribe_backoff_ms),
        }
    }

    pub fn unlock_duration(&self) -> Duration {
        Duration::from_secs(self.unlock_duration_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.contract, "contract.sol:Storage");
        assert_eq!(config.account_index, 0);
        assert!(config.passphrase.is_empty());
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline_config(), PipelineConfig::default());
        assert_eq!(config.mining_config(), MiningConfig::default());
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config, CliConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = CliConfig::default();
        config.rpc_url = "http://10.0.0.5:8545".to_string();
        config.mining.threads = 4;
        config.pipeline.call_margin_percent = 20;
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.mining_config().threads, 4);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "rpc_url = \"http://node:8545\"\n\n[mining]\nthreads = 2\n").unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.mining.threads, 2);
        assert!(config.mining.stop_on_shutdown);
        assert_eq!(config.pipeline, PipelineSection::default());
    }

    #[test]
    fn test_unparseable_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "rpc_url = [").unwrap();
        assert!(CliConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = CliConfig::default();
        config.mining.threads = 0;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.pipeline.receipt_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.pipeline.deploy_margin_percent = 1001;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.pipeline.call_margin_percent = 1000;
        assert!(config.validate().is_ok());
    }
}
