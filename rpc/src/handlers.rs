//! RPC request handlers.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use ballot_reconciler::{
    AuditOutcome, ConfirmOutcome, ElectionResults, NewElection, ReconcileError, SubmitVote,
    TallyReport,
};
use ballot_types::{
    CandidateId, Election, ElectionId, ElectionStatus, IdempotencyKey, RequestMetadata, TxHash,
    Vote, VoteId, VoterId,
};

use crate::pagination::{next_cursor, PageMeta, PageParams};
use crate::server::AppState;
use crate::RpcError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

fn invalid<E: std::fmt::Display>(e: E) -> RpcError {
    RpcError::InvalidRequest(e.to_string())
}

fn parse_vote_id(raw: &str) -> Result<VoteId, RpcError> {
    VoteId::from_hex(raw).map_err(invalid)
}

fn parse_election_id(raw: String) -> Result<ElectionId, RpcError> {
    ElectionId::new(raw).map_err(invalid)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address and user agent as seen by the proxy in front of us.
fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    let ip = header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    RequestMetadata {
        ip,
        user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_string),
    }
}

// ── Votes ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitVoteRequest {
    pub voter: String,
    pub candidate: String,
    pub election: String,
}

#[derive(Serialize)]
pub struct SubmitVoteResponse {
    pub replayed: bool,
    pub vote: Vote,
}

pub async fn submit_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitVoteRequest>,
) -> Result<(StatusCode, Json<SubmitVoteResponse>), RpcError> {
    let idempotency_key = header_str(&headers, IDEMPOTENCY_KEY_HEADER)
        .map(IdempotencyKey::new)
        .transpose()
        .map_err(invalid)?;
    let request = SubmitVote {
        voter: VoterId::new(body.voter).map_err(invalid)?,
        candidate: CandidateId::new(body.candidate).map_err(invalid)?,
        election: ElectionId::new(body.election).map_err(invalid)?,
        idempotency_key,
        metadata: request_metadata(&headers),
    };

    let receipt = state.reconciler.submit_vote(request).await?;
    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(SubmitVoteResponse {
            replayed: receipt.replayed,
            vote: receipt.vote,
        }),
    ))
}

pub async fn get_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vote>, RpcError> {
    let id = parse_vote_id(&id)?;
    Ok(Json(state.reconciler.vote_status(&id)?))
}

pub async fn vote_by_tx(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Vote>, RpcError> {
    let hash = TxHash::from_hex(&hash).map_err(invalid)?;
    state
        .reconciler
        .find_vote_by_tx(&hash)?
        .map(Json)
        .ok_or_else(|| ReconcileError::VoteNotFound(hash.to_string()).into())
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    pub vote: Vote,
}

impl From<ConfirmOutcome> for ConfirmResponse {
    fn from(outcome: ConfirmOutcome) -> Self {
        match outcome {
            ConfirmOutcome::Verified(vote) => Self {
                outcome: "verified",
                confirmations: None,
                vote,
            },
            ConfirmOutcome::AlreadyVerified(vote) => Self {
                outcome: "already_verified",
                confirmations: None,
                vote,
            },
            ConfirmOutcome::Pending {
                vote,
                confirmations,
            } => Self {
                outcome: "pending",
                confirmations: Some(confirmations),
                vote,
            },
        }
    }
}

pub async fn confirm_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConfirmResponse>, RpcError> {
    let id = parse_vote_id(&id)?;
    let outcome = state.reconciler.confirm_vote(&id).await?;
    Ok(Json(outcome.into()))
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub outcome: &'static str,
    pub vote: Vote,
}

impl From<AuditOutcome> for AuditResponse {
    fn from(outcome: AuditOutcome) -> Self {
        let (label, vote) = match outcome {
            AuditOutcome::Canonical(vote) => ("canonical", vote),
            AuditOutcome::NotVerified(vote) => ("not_verified", vote),
            AuditOutcome::AlreadyInvalidated(vote) => ("already_invalidated", vote),
        };
        Self {
            outcome: label,
            vote,
        }
    }
}

pub async fn audit_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuditResponse>, RpcError> {
    let id = parse_vote_id(&id)?;
    let outcome = state.reconciler.audit_vote(&id).await?;
    Ok(Json(outcome.into()))
}

// ── Elections ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ElectionResponse {
    pub status: ElectionStatus,
    #[serde(flatten)]
    pub election: Election,
}

impl ElectionResponse {
    fn at(election: Election, state: &AppState) -> Self {
        Self {
            status: election.status(state.reconciler.now()),
            election,
        }
    }
}

pub async fn create_election(
    State(state): State<AppState>,
    Json(body): Json<NewElection>,
) -> Result<(StatusCode, Json<ElectionResponse>), RpcError> {
    let election = state.reconciler.create_election(body)?;
    Ok((
        StatusCode::CREATED,
        Json(ElectionResponse::at(election, &state)),
    ))
}

#[derive(Serialize)]
pub struct ElectionListResponse {
    pub elections: Vec<ElectionResponse>,
}

pub async fn list_elections(
    State(state): State<AppState>,
) -> Result<Json<ElectionListResponse>, RpcError> {
    let elections = state
        .reconciler
        .list_elections()?
        .into_iter()
        .map(|e| ElectionResponse::at(e, &state))
        .collect();
    Ok(Json(ElectionListResponse { elections }))
}

pub async fn get_election(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ElectionResponse>, RpcError> {
    let id = parse_election_id(id)?;
    let election = state.reconciler.get_election(&id)?;
    Ok(Json(ElectionResponse::at(election, &state)))
}

#[derive(Deserialize)]
pub struct ActivateParams {
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn activate_election(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ActivateParams>,
) -> Result<Json<ElectionResponse>, RpcError> {
    let id = parse_election_id(id)?;
    let election = state.reconciler.set_active(&id, params.active)?;
    Ok(Json(ElectionResponse::at(election, &state)))
}

pub async fn cancel_election(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ElectionResponse>, RpcError> {
    let id = parse_election_id(id)?;
    let election = state.reconciler.cancel_election(&id)?;
    Ok(Json(ElectionResponse::at(election, &state)))
}

pub async fn election_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ElectionResults>, RpcError> {
    let id = parse_election_id(id)?;
    Ok(Json(state.reconciler.election_results(&id)?))
}

#[derive(Serialize)]
pub struct VoteListResponse {
    pub votes: Vec<Vote>,
    #[serde(flatten)]
    pub page: PageMeta,
}

pub async fn election_votes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<VoteListResponse>, RpcError> {
    let id = parse_election_id(id)?;
    let after = params.after()?;
    let limit = params.effective_limit();
    let votes = state
        .reconciler
        .election_votes(&id, after.as_ref(), limit as usize)?;
    let next = next_cursor(votes.last().map(|v| &v.id), votes.len(), limit);
    Ok(Json(VoteListResponse {
        votes,
        page: PageMeta { next },
    }))
}

pub async fn verify_tally(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TallyReport>, RpcError> {
    let id = parse_election_id(id)?;
    Ok(Json(state.reconciler.verify_tally(&id)?))
}

// ── Operations ───────────────────────────────────────────────────────────

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, RpcError> {
    let body = state
        .reconciler
        .metrics()
        .encode()
        .map_err(|e| RpcError::Metrics(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub pending_votes: usize,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, RpcError> {
    let pending_votes = state.reconciler.pending_votes()?.len();
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        pending_votes,
    }))
}
