//! The node: storage, ledger, reconciler, workers and HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ballot_ledger::{JsonRpcLedger, Ledger};
use ballot_reconciler::{
    AuditWorker, ConfirmationWorker, Notifier, TracingNotifier, VoteReconciler, WebhookNotifier,
};
use ballot_rpc::RpcServer;
use ballot_store_lmdb::{
    check_data_dir, check_integrity, LmdbEnvironment, Migrator, DEFAULT_MAX_DBS,
};
use ballot_types::{Clock, SystemClock};

use crate::{NodeConfig, NodeError, NotifierConfig, NotifierKind, ShutdownController};

pub struct BallotNode {
    config: NodeConfig,
    environment: LmdbEnvironment,
    reconciler: Arc<VoteReconciler>,
    shutdown: Arc<ShutdownController>,
    task_handles: Vec<JoinHandle<()>>,
    rpc_addr: Option<SocketAddr>,
    started: bool,
}

impl BallotNode {
    /// Build a node talking JSON-RPC to the configured ledger node.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let ledger = JsonRpcLedger::new(config.ledger.clone())?;
        Self::with_parts(config, Arc::new(ledger), Arc::new(SystemClock))
    }

    /// Build a node over an arbitrary ledger and clock.
    pub fn with_parts(
        config: NodeConfig,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NodeError> {
        config.validate()?;

        check_data_dir(&config.data_dir)?;
        let environment = LmdbEnvironment::open(
            &config.data_dir,
            DEFAULT_MAX_DBS,
            config.map_size_bytes(),
        )?;
        Migrator::run(&environment.meta_store())?;

        let report = check_integrity(environment.env())?;
        if !report.is_healthy() {
            return Err(NodeError::Integrity(report.errors.join("; ")));
        }
        tracing::info!(
            path = %config.data_dir.display(),
            databases = report.databases_checked,
            entries = report.total_entries,
            "store opened"
        );

        let notifier = build_notifier(&config.notifier)?;
        let reconciler = VoteReconciler::new(
            Arc::new(environment.ballot_store()),
            ledger,
            clock,
            config.reconciler.clone(),
        )
        .with_notifier(notifier);

        let adopted = reconciler.adopt_stashed()?;
        let pending = reconciler.refresh_pending_gauge()?;
        tracing::info!(adopted, pending, "reconciler state loaded");

        Ok(Self {
            config,
            environment,
            reconciler: Arc::new(reconciler),
            shutdown: Arc::new(ShutdownController::new()),
            task_handles: Vec::new(),
            rpc_addr: None,
            started: false,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<VoteReconciler> {
        &self.reconciler
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.shutdown.clone()
    }

    /// Address the HTTP API is bound to, once started.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_addr
    }

    /// Spawn the background workers and the HTTP API. Returns once they are
    /// running; call [`stop`](Self::stop) to wind them down.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.started {
            return Err(NodeError::AlreadyStarted);
        }

        if self.config.enable_workers {
            let confirmation = ConfirmationWorker::new(self.reconciler.clone());
            self.task_handles
                .push(confirmation.spawn(self.shutdown.subscribe()));
            let audit = AuditWorker::new(self.reconciler.clone());
            self.task_handles.push(audit.spawn(self.shutdown.subscribe()));
            tracing::info!(
                poll_interval_ms = self.config.reconciler.poll_interval_ms,
                audit_interval_secs = self.config.reconciler.audit_interval_secs,
                "reconciler workers started"
            );
        }

        if self.config.enable_rpc {
            let listener = TcpListener::bind(self.config.rpc_socket_addr()).await?;
            self.rpc_addr = Some(listener.local_addr()?);
            let server = RpcServer::new(self.reconciler.clone());
            let shutdown_rx = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                if let Err(e) = server.serve(listener, shutdown_rx).await {
                    tracing::error!(error = %e, "rpc server failed");
                }
            }));
        }

        self.started = true;
        tracing::info!(
            rpc = ?self.rpc_addr,
            ledger = %self.config.ledger.endpoint,
            confirmation_depth = self.config.reconciler.confirmation_depth,
            "ballot node started"
        );
        Ok(())
    }

    /// Stop the node gracefully.
    ///
    /// 1. Sends the shutdown signal to every task.
    /// 2. Waits for the tasks to finish, up to the configured timeout.
    /// 3. Flushes LMDB to disk.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("ballot node stopping");
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            tracing::warn!(?timeout, "shutdown timeout, some tasks may still be running");
        }

        self.environment
            .env()
            .force_sync()
            .map_err(ballot_store_lmdb::LmdbError::from)?;
        tracing::info!("LMDB flushed to disk");

        self.started = false;
        self.rpc_addr = None;
        tracing::info!("ballot node stopped");
        Ok(())
    }
}

fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NodeError> {
    match (config.kind, config.webhook_url.as_deref()) {
        (NotifierKind::Log, _) => Ok(Arc::new(TracingNotifier)),
        (NotifierKind::Webhook, Some(url)) => {
            tracing::info!(url, "vote notifications go to webhook");
            Ok(Arc::new(WebhookNotifier::new(url, config.timeout())?))
        }
        (NotifierKind::Webhook, None) => Err(NodeError::Config(
            "notifier.webhook_url is required for the webhook notifier".into(),
        )),
    }
}
