//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ballot_ledger::JsonRpcLedgerConfig;
use ballot_reconciler::ReconcilerConfig;

use crate::NodeError;

/// Configuration for a ballot reconciler node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Plain settings come first; the
/// `[ledger]`, `[reconciler]` and `[notifier]` tables follow them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory for the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// LMDB map size in mebibytes.
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: usize,

    /// Whether to serve the HTTP API.
    #[serde(default = "default_true")]
    pub enable_rpc: bool,

    /// Address the HTTP API binds to.
    #[serde(default = "default_rpc_address")]
    pub rpc_address: IpAddr,

    /// HTTP API port. Zero picks a free port.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Whether to run the confirmation and audit workers.
    #[serde(default = "default_true")]
    pub enable_workers: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long `stop` waits for background tasks.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default)]
    pub ledger: JsonRpcLedgerConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Where terminal vote transitions are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Log only.
    #[default]
    Log,
    /// POST a JSON body to `webhook_url`.
    Webhook,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(default = "default_notifier_timeout_ms")]
    pub timeout_ms: u64,
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            webhook_url: None,
            timeout_ms: default_notifier_timeout_ms(),
        }
    }
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./ballot_data")
}

fn default_map_size_mb() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_rpc_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_rpc_port() -> u16 {
    7080
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_notifier_timeout_ms() -> u64 {
    5_000
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject settings that parse but cannot work.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.map_size_mb == 0 {
            return Err(NodeError::Config("map_size_mb must be positive".into()));
        }
        if self.notifier.kind == NotifierKind::Webhook && self.notifier.webhook_url.is_none() {
            return Err(NodeError::Config(
                "notifier.webhook_url is required for the webhook notifier".into(),
            ));
        }
        if self.reconciler.poll_interval_ms == 0 {
            return Err(NodeError::Config(
                "reconciler.poll_interval_ms must be positive".into(),
            ));
        }
        if self.reconciler.audit_interval_secs == 0 {
            return Err(NodeError::Config(
                "reconciler.audit_interval_secs must be positive".into(),
            ));
        }
        if self.reconciler.retry_min_delay_ms > self.reconciler.retry_max_delay_ms {
            return Err(NodeError::Config(
                "reconciler.retry_min_delay_ms exceeds retry_max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn map_size_bytes(&self) -> usize {
        self.map_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn rpc_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.rpc_address, self.rpc_port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            map_size_mb: default_map_size_mb(),
            enable_rpc: default_true(),
            rpc_address: default_rpc_address(),
            rpc_port: default_rpc_port(),
            enable_workers: default_true(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            ledger: JsonRpcLedgerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().expect("should serialize");
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.rpc_port, config.rpc_port);
        assert_eq!(parsed.ledger.endpoint, config.ledger.endpoint);
        assert_eq!(
            parsed.reconciler.confirmation_depth,
            config.reconciler.confirmation_depth
        );
        assert_eq!(parsed.notifier, config.notifier);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.rpc_port, 7080);
        assert_eq!(config.log_format, "human");
        assert_eq!(config.reconciler.confirmation_depth, 12);
        assert_eq!(config.reconciler.confirmation_timeout_secs, 600);
        assert_eq!(config.reconciler.audit_interval_secs, 60);
        assert_eq!(config.reconciler.audit_window_secs, 3600);
        assert_eq!(config.notifier.kind, NotifierKind::Log);
    }

    #[test]
    fn nested_tables_override() {
        let toml = r#"
            rpc_port = 9999
            log_format = "json"

            [ledger]
            endpoint = "http://chain:8545"
            contract_address = "0x00000000000000000000000000000000000000aa"

            [reconciler]
            confirmation_depth = 3

            [notifier]
            kind = "webhook"
            webhook_url = "http://mailer/votes"
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.rpc_port, 9999);
        assert_eq!(config.log_format, "json");
        assert_eq!(config.ledger.endpoint, "http://chain:8545");
        assert_eq!(config.reconciler.confirmation_depth, 3);
        assert_eq!(config.reconciler.submit_retries, 3); // default
        assert_eq!(config.notifier.kind, NotifierKind::Webhook);
        assert_eq!(config.log_level, "info"); // default
    }

    #[test]
    fn webhook_without_url_is_rejected() {
        let toml = r#"
            [notifier]
            kind = "webhook"
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(toml),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn zero_worker_intervals_are_rejected() {
        for toml in [
            "[reconciler]\npoll_interval_ms = 0",
            "[reconciler]\naudit_interval_secs = 0",
        ] {
            let err = NodeConfig::from_toml_str(toml).unwrap_err();
            assert!(matches!(err, NodeError::Config(msg) if msg.contains("interval")));
        }

        let config = NodeConfig {
            reconciler: ReconcilerConfig {
                poll_interval_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/ballot.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn derived_values() {
        let config = NodeConfig {
            map_size_mb: 2,
            rpc_port: 8000,
            ..Default::default()
        };
        assert_eq!(config.map_size_bytes(), 2 * 1024 * 1024);
        assert_eq!(config.rpc_socket_addr().to_string(), "127.0.0.1:8000");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }
}
