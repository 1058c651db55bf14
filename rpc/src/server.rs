//! Axum-based RPC server.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::Span;

use ballot_reconciler::VoteReconciler;

use crate::handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<VoteReconciler>,
    pub started: Instant,
}

pub struct RpcServer {
    state: AppState,
}

impl RpcServer {
    pub fn new(reconciler: Arc<VoteReconciler>) -> Self {
        Self {
            state: AppState {
                reconciler,
                started: Instant::now(),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/votes", post(handlers::submit_vote))
            .route("/votes/:id", get(handlers::get_vote))
            .route("/votes/:id/confirm", post(handlers::confirm_vote))
            .route("/votes/:id/audit", post(handlers::audit_vote))
            .route("/transactions/:hash/vote", get(handlers::vote_by_tx))
            .route(
                "/elections",
                post(handlers::create_election).get(handlers::list_elections),
            )
            .route("/elections/:id", get(handlers::get_election))
            .route("/elections/:id/activate", post(handlers::activate_election))
            .route("/elections/:id/cancel", post(handlers::cancel_election))
            .route("/elections/:id/results", get(handlers::election_results))
            .route("/elections/:id/votes", get(handlers::election_votes))
            .route("/elections/:id/tally", get(handlers::verify_tally))
            .route("/metrics", get(handlers::metrics))
            .route("/health", get(handlers::health))
            .layer(TraceLayer::new_for_http().make_span_with(rpc_span::<Body>))
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "rpc server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;
        tracing::info!("rpc server stopped");
        Ok(())
    }
}

/// Span wrapping every HTTP request.
pub fn rpc_span<B>(request: &Request<B>) -> Span {
    tracing::info_span!(
        "rpc",
        method = %request.method(),
        path = %request.uri().path(),
    )
}
