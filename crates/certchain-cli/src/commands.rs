//! CLI command implementations.

use anyhow::{bail, Context};
use certchain_core::address_file::{read_address, write_address};
use certchain_core::{
    AccountSession, ArtifactKey, ArtifactStore, ContractArtifact, MiningController,
    PipelineError, StorageContract, TransactionOutcome,
};
use certchain_rpc::{HttpNodeClient, NodeClient};
use certchain_types::Address;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::CliConfig;
use crate::output::*;

/// Main CLI.
#[derive(Debug, Parser)]
#[command(name = "certchain")]
#[command(about = "Store and retrieve certificate keys through a storage contract")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(after_help = "The account passphrase is taken from the CERTCHAIN_PASSPHRASE \
environment variable, falling back to `passphrase` in the config file.")]
pub struct Cli {
    /// Configuration file (default: ~/.certchain/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// HTTP RPC endpoint URL
    #[arg(short, long, global = true)]
    pub rpc: Option<String>,

    /// WebSocket RPC endpoint URL
    #[arg(long, global = true)]
    pub ws: Option<String>,

    /// Log filter, e.g. `debug` or `certchain_core=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Deploy the storage contract and record its address
    Deploy,

    /// Check whether an account may store keys
    Authorized {
        /// Account to check (default: the sending account)
        #[arg(value_parser = parse_address)]
        account: Option<Address>,
    },

    /// Store a key under an ID
    Store {
        /// Certificate ID
        #[arg(value_parser = non_empty)]
        id: String,
        /// Key to store
        #[arg(value_parser = non_empty)]
        key: String,
    },

    /// Retrieve the key stored under an ID
    Retrieve {
        /// Certificate ID
        #[arg(value_parser = non_empty)]
        id: String,
    },

    /// Mine only while transactions are pending (until Ctrl-C)
    Mine {
        /// Miner threads
        #[arg(short, long)]
        threads: Option<u32>,
    },

    /// Show node status
    Status,
}

fn non_empty(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse().map_err(|e: certchain_types::TypesError| e.to_string())
}

/// Environment variable holding the account passphrase.
pub const PASSPHRASE_ENV: &str = "CERTCHAIN_PASSPHRASE";

impl Cli {
    /// Fold command line overrides and the passphrase from
    /// [`PASSPHRASE_ENV`] into `config`.
    pub fn apply_overrides(&self, config: &mut CliConfig, passphrase: Option<String>) {
        if let Some(rpc) = &self.rpc {
            config.rpc_url = rpc.clone();
        }
        if let Some(ws) = &self.ws {
            config.ws_url = ws.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(passphrase) = passphrase {
            config.passphrase = passphrase;
        }
        if let Commands::Mine {
            threads: Some(threads),
        } = self.command
        {
            config.mining.threads = threads;
        }
    }
}

/// Everything a command needs to talk to the node.
struct App {
    config: CliConfig,
    client: Arc<HttpNodeClient>,
}

impl App {
    fn new(config: CliConfig) -> anyhow::Result<Self> {
        let client = HttpNodeClient::new(config.rpc_url.clone(), config.request_timeout())
            .context("failed to create RPC client")?
            .with_ws_url(config.ws_url.clone());
        debug!(rpc = %config.rpc_url, ws = %config.ws_url, "node client ready");

        Ok(Self {
            config,
            client: Arc::new(client),
        })
    }

    fn artifact(&self) -> anyhow::Result<Arc<ContractArtifact>> {
        let path = &self.config.artifact_path;
        let store = ArtifactStore::open(path)
            .with_context(|| format!("failed to load contract artifacts from {}", path.display()))?;
        let key: ArtifactKey = self.config.contract.parse()?;
        Ok(store.load_key(&key)?)
    }

    fn session(&self) -> AccountSession<HttpNodeClient> {
        AccountSession::new(self.client.clone(), self.config.unlock_duration())
    }

    fn passphrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.config.passphrase.clone())
    }

    fn contract(&self) -> anyhow::Result<StorageContract<HttpNodeClient>> {
        let path = &self.config.address_file;
        let address = read_address(path)
            .context("no deployed contract recorded, run `certchain deploy` first")?;
        debug!(%address, "using deployed contract");

        Ok(StorageContract::at(
            self.client.clone(),
            self.artifact()?,
            address,
            self.config.pipeline_config(),
        ))
    }
}

/// Attach the failed step to a pipeline error.
fn step_failed(error: PipelineError) -> anyhow::Error {
    let stage = error.stage();
    anyhow::Error::new(error).context(format!("{} failed", stage))
}

/// Execute a command.
pub async fn execute(cmd: Commands, config: CliConfig) -> anyhow::Result<()> {
    let app = App::new(config)?;

    match cmd {
        Commands::Deploy => execute_deploy(&app).await,
        Commands::Authorized { account } => execute_authorized(&app, account).await,
        Commands::Store { id, key } => execute_store(&app, &id, &key).await,
        Commands::Retrieve { id } => execute_retrieve(&app, &id).await,
        Commands::Mine { .. } => execute_mine(&app).await,
        Commands::Status => execute_status(&app).await,
    }
}

async fn execute_deploy(app: &App) -> anyhow::Result<()> {
    let artifact = app.artifact()?;
    let session = app.session();
    let sender = session
        .resolve_sender(app.config.account_index)
        .await
        .map_err(step_failed)?;
    print_info(&format!("Deploying {} from {}", artifact.key(), sender));

    let outcome = StorageContract::deploy(
        app.client.clone(),
        &artifact,
        &app.config.pipeline_config(),
        &session,
        sender,
        &app.passphrase(),
    )
    .await
    .map_err(step_failed)?;

    match outcome {
        TransactionOutcome::Deployed { address, receipt } => {
            write_address(&app.config.address_file, &address)?;
            print_success(&format!("Contract deployed to: {}", address));
            print_info(&format!(
                "Address written to {}",
                app.config.address_file.display()
            ));
            print_receipt(&receipt);
            Ok(())
        }
        TransactionOutcome::Sent { receipt, .. } => {
            print_receipt(&receipt);
            bail!("contract creation reverted")
        }
        TransactionOutcome::CallResult { .. } => bail!("unexpected call result from deploy"),
    }
}

async fn execute_authorized(app: &App, account: Option<Address>) -> anyhow::Result<()> {
    let contract = app.contract()?;
    let sender = app
        .session()
        .resolve_sender(app.config.account_index)
        .await
        .map_err(step_failed)?;
    let account = account.unwrap_or(sender);

    let allowed = contract
        .has_write_privilege(sender, account)
        .await
        .map_err(step_failed)?;

    println!("Account {}", account);
    println!("Has write privilege: {}", allowed);
    Ok(())
}

async fn execute_store(app: &App, id: &str, key: &str) -> anyhow::Result<()> {
    let contract = app.contract()?;
    let session = app.session();
    let sender = session
        .resolve_sender(app.config.account_index)
        .await
        .map_err(step_failed)?;

    let outcome = contract
        .store_key(&session, sender, &app.passphrase(), id, key)
        .await
        .map_err(step_failed)?;

    match outcome {
        TransactionOutcome::Sent { receipt, success: true } => {
            print_success(&format!("Successfully stored {} into ID {}", key, id));
            print_receipt(&receipt);
            Ok(())
        }
        TransactionOutcome::Sent { receipt, .. } => {
            print_receipt(&receipt);
            bail!("Unsuccessful: the transaction reverted, the account may lack write privilege")
        }
        other => bail!("unexpected outcome {:?}", other),
    }
}

async fn execute_retrieve(app: &App, id: &str) -> anyhow::Result<()> {
    let contract = app.contract()?;
    let caller = app
        .session()
        .resolve_sender(app.config.account_index)
        .await
        .map_err(step_failed)?;

    let key = contract
        .retrieve_key(caller, id)
        .await
        .map_err(step_failed)?;
    if key.is_empty() {
        print_warning(&format!("Nothing stored under ID {}", id));
    } else {
        println!("{}", key);
    }
    Ok(())
}

async fn execute_mine(app: &App) -> anyhow::Result<()> {
    let config = app.config.mining_config();
    print_info(&format!(
        "Mining on demand with {} thread(s), Ctrl-C to stop",
        config.threads
    ));

    let mut controller = MiningController::new(app.client.clone(), config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            print_error(&format!("cannot listen for Ctrl-C: {}", e));
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };

    let report = controller
        .run_until(shutdown)
        .await
        .context("mining controller stopped")?;
    print_mining_report(&report);
    Ok(())
}

async fn execute_status(app: &App) -> anyhow::Result<()> {
    let client = app.client.as_ref();
    let status = NodeStatus {
        rpc_url: client.url().to_string(),
        block_number: client.block_number().await.context("eth_blockNumber")?,
        gas_price: client.gas_price().await.context("eth_gasPrice")?,
        mining: client.is_mining().await.context("eth_mining")?,
        pending: client
            .pending_transaction_count()
            .await
            .context("pending transaction count")?,
        accounts: client.list_accounts().await.context("eth_accounts")?,
    };
    print_node_status(&status);

    if let Ok(address) = read_address(&app.config.address_file) {
        println!("Contract:      {}", format_address_short(&address));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("certchain").chain(args.iter().copied()))
    }

    #[test]
    fn test_store_arguments() {
        let cli = parse(&["store", "cert-1", "k3y"]).unwrap();
        match cli.command {
            Commands::Store { id, key } => {
                assert_eq!(id, "cert-1");
                assert_eq!(key, "k3y");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_missing_arguments_are_rejected() {
        assert!(parse(&["store", "cert-1"]).is_err());
        assert!(parse(&["retrieve"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_extra_arguments_are_rejected() {
        let err = parse(&["retrieve", "a", "b"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
        assert!(parse(&["store", "a", "b", "c"]).is_err());
        assert!(parse(&["deploy", "now"]).is_err());
    }

    #[test]
    fn test_empty_arguments_are_rejected() {
        let err = parse(&["store", "", "key"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert!(parse(&["store", "id", "   "]).is_err());
        assert!(parse(&["retrieve", ""]).is_err());
    }

    #[test]
    fn test_unicode_arguments_pass_through() {
        let cli = parse(&["store", "zertifikat-ü", "schlüssel ✓"]).unwrap();
        assert!(matches!(cli.command, Commands::Store { ref key, .. } if key == "schlüssel ✓"));
    }

    #[test]
    fn test_authorized_account() {
        let cli = parse(&["authorized"]).unwrap();
        assert!(matches!(cli.command, Commands::Authorized { account: None }));

        let cli = parse(&["authorized", "0x1111111111111111111111111111111111111111"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Authorized { account: Some(a) } if a == Address::from_bytes([0x11; 20])
        ));

        assert!(parse(&["authorized", "not-an-address"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = parse(&[
            "--rpc",
            "http://node:8545",
            "mine",
            "--threads",
            "3",
            "--ws",
            "ws://node:8546",
        ])
        .unwrap();

        let mut config = CliConfig::default();
        cli.apply_overrides(&mut config, None);
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.ws_url, "ws://node:8546");
        assert_eq!(config.mining.threads, 3);
        assert_eq!(config.log_level, "info");
        assert!(config.passphrase.is_empty());
    }

    #[test]
    fn test_passphrase_is_not_a_flag() {
        let err = parse(&["--passphrase", "hunter2", "status"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);

        let cli = parse(&["status"]).unwrap();
        let mut config = CliConfig::default();
        config.passphrase = "from-file".to_string();
        cli.apply_overrides(&mut config, Some("from-env".to_string()));
        assert_eq!(config.passphrase, "from-env");
    }
}
