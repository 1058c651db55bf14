//! Ballot reconciler daemon.

use anyhow::Context;
use ballot_node::{init_logging, BallotNode, LogFormat, NodeConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ballot-daemon", about = "Off-chain vote store reconciled against a ledger")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base; flags
    /// and env vars override them.
    #[arg(long, env = "BALLOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the node until SIGINT/SIGTERM.
    Run(RunArgs),
    /// Print the default configuration as TOML.
    InitConfig,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Data directory for the LMDB environment.
    #[arg(long, env = "BALLOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP API port.
    #[arg(long, env = "BALLOT_RPC_PORT")]
    rpc_port: Option<u16>,

    /// Disable the HTTP API.
    #[arg(long, env = "BALLOT_DISABLE_RPC")]
    no_rpc: bool,

    /// Ledger JSON-RPC endpoint.
    #[arg(long, env = "BALLOT_LEDGER_ENDPOINT")]
    ledger_endpoint: Option<String>,

    /// Blocks required before a vote is verified.
    #[arg(long, env = "BALLOT_CONFIRMATION_DEPTH")]
    confirmation_depth: Option<u64>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "BALLOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "BALLOT_LOG_FORMAT")]
    log_format: Option<String>,
}

impl RunArgs {
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if self.no_rpc {
            config.enable_rpc = false;
        }
        if let Some(endpoint) = self.ledger_endpoint {
            config.ledger.endpoint = endpoint;
        }
        if let Some(depth) = self.confirmation_depth {
            config.reconciler.confirmation_depth = depth;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(NodeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig => {
            let config = load_config(cli.config.as_ref())?;
            print!("{}", config.to_toml_string()?);
        }
        Command::Run(args) => {
            let config = args.apply(load_config(cli.config.as_ref())?);
            config.validate()?;

            let format: LogFormat = config.log_format.parse()?;
            init_logging(format, &config.log_level)?;
            if let Some(path) = &cli.config {
                tracing::info!(path = %path.display(), "loaded config");
            }
            let rpc = if config.enable_rpc {
                config.rpc_socket_addr().to_string()
            } else {
                "off".to_string()
            };
            tracing::info!(
                data_dir = %config.data_dir.display(),
                ledger = %config.ledger.endpoint,
                rpc = %rpc,
                "starting ballot node"
            );

            let mut node = BallotNode::new(config).context("failed to build node")?;
            node.start().await?;

            node.shutdown_controller().wait_for_signal().await;
            tracing::info!("shutdown signal received, stopping node");
            node.stop().await?;

            tracing::info!("ballot daemon exited cleanly");
        }
    }

    Ok(())
}
