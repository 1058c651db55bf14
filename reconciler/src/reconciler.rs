//! The reconciler state machine.

use std::sync::Arc;
use std::time::Instant;

use backon::Retryable;
use tracing::{debug, error, info, warn, Instrument};

use ballot_ledger::{confirmations, Ledger, LedgerError, TxStatus};
use ballot_store::transition::idempotency_outcome;
use ballot_store::{
    BallotReservation, BallotStore, IdempotencyEntry, ReserveOutcome, StoreError, Transition,
};
use ballot_types::{
    Ballot, CandidateId, Clock, ElectionId, ElectionStatus, IdempotencyKey, Inclusion,
    RequestMetadata, Timestamp, TxHash, VerificationStatus, Vote, VoteId, VoterId,
};

use crate::metrics::ReconcilerMetrics;
use crate::notify::{Notification, NotificationKind, Notifier, TracingNotifier};
use crate::policy::{ConfirmationPolicy, ReconcilerConfig, RetryPolicy};
use crate::tracing_spans::{audit_span, confirm_span, submit_span};
use crate::ReconcileError;

pub(crate) const REASON_REVERTED: &str = "transaction reverted";
pub(crate) const REASON_TIMED_OUT: &str = "confirmation timed out";
pub(crate) const REASON_DROPPED: &str = "transaction dropped";

/// A request to cast a ballot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitVote {
    pub voter: VoterId,
    pub candidate: CandidateId,
    pub election: ElectionId,
    pub idempotency_key: Option<IdempotencyKey>,
    pub metadata: RequestMetadata,
}

impl SubmitVote {
    fn ballot(&self) -> Ballot {
        Ballot {
            voter: self.voter.clone(),
            candidate: self.candidate.clone(),
            election: self.election.clone(),
        }
    }
}

/// Result of a successful `submit_vote`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub vote: Vote,
    /// The idempotency key had already produced this vote.
    pub replayed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// This call promoted the vote and counted it.
    Verified(Vote),
    /// The vote was verified earlier; nothing changed.
    AlreadyVerified(Vote),
    /// Not yet final.
    Pending { vote: Vote, confirmations: u64 },
}

impl ConfirmOutcome {
    pub fn vote(&self) -> &Vote {
        match self {
            Self::Verified(vote) | Self::AlreadyVerified(vote) => vote,
            Self::Pending { vote, .. } => vote,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    /// The vote's transaction is still in its recorded canonical block.
    Canonical(Vote),
    /// Only verified votes are audited.
    NotVerified(Vote),
    AlreadyInvalidated(Vote),
}

impl AuditOutcome {
    pub fn vote(&self) -> &Vote {
        match self {
            Self::Canonical(vote) | Self::NotVerified(vote) | Self::AlreadyInvalidated(vote) => {
                vote
            }
        }
    }
}

/// Releases a ballot reservation unless the vote was committed.
///
/// Dropping the guard covers every early exit of `submit_vote`, including
/// the caller dropping the future mid-submission. Once the ledger has
/// accepted the transaction the slot is never released: an uncommitted vote
/// is stashed in the slot instead, for [`VoteReconciler::adopt_stashed`].
struct ReservationGuard {
    store: Arc<dyn BallotStore>,
    voter: VoterId,
    election: ElectionId,
    idempotency_key: Option<IdempotencyKey>,
    submitted: Option<Vote>,
    armed: bool,
}

impl ReservationGuard {
    fn new(store: Arc<dyn BallotStore>, request: &SubmitVote) -> Self {
        Self {
            store,
            voter: request.voter.clone(),
            election: request.election.clone(),
            idempotency_key: request.idempotency_key.clone(),
            submitted: None,
            armed: true,
        }
    }

    /// The ledger accepted `vote`'s transaction.
    fn submitted(&mut self, vote: Vote) {
        self.submitted = Some(vote);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(vote) = self.submitted.take() {
            match self.store.stash_submission(&vote) {
                Ok(()) => {
                    warn!(vote = %vote.id, tx = %vote.tx_hash, "vote not recorded, stashed for adoption")
                }
                Err(e) => error!(
                    vote = %vote.id,
                    tx = %vote.tx_hash,
                    voter = %vote.voter,
                    election = %vote.election,
                    candidate = %vote.candidate,
                    error = %e,
                    "ledger accepted a vote the store could neither record nor stash"
                ),
            }
            return;
        }
        match self.store.release_reservation(
            &self.voter,
            &self.election,
            self.idempotency_key.as_ref(),
        ) {
            Ok(released) => {
                debug!(voter = %self.voter, election = %self.election, released, "ballot reservation released")
            }
            Err(e) => {
                warn!(voter = %self.voter, election = %self.election, error = %e, "failed to release ballot reservation")
            }
        }
    }
}

/// Keeps off-chain votes and their ledger transactions consistent.
pub struct VoteReconciler {
    pub(crate) store: Arc<dyn BallotStore>,
    ledger: Arc<dyn Ledger>,
    pub(crate) clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<ReconcilerMetrics>,
    pub(crate) config: ReconcilerConfig,
    confirmation: ConfirmationPolicy,
    retry: RetryPolicy,
}

impl VoteReconciler {
    pub fn new(
        store: Arc<dyn BallotStore>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            notifier: Arc::new(TracingNotifier),
            metrics: Arc::new(ReconcilerMetrics::new()),
            confirmation: config.confirmation_policy(),
            retry: config.retry_policy(),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ReconcilerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ReconcilerMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Current time as seen by this reconciler's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ── submit ──────────────────────────────────────────────────────────

    /// Record a vote and submit it on-chain.
    ///
    /// Returns once the ledger accepted the transaction; the vote is
    /// `Pending` until [`confirm_vote`](Self::confirm_vote) sees it deep
    /// enough. A replayed idempotency key returns the original vote.
    pub async fn submit_vote(&self, request: SubmitVote) -> Result<SubmitReceipt, ReconcileError> {
        let span = submit_span(request.voter.as_str(), request.election.as_str());
        let started = Instant::now();
        let result = self.submit_inner(&request).instrument(span).await;
        self.metrics
            .submit_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            self.metrics.record_rejection(e.reason());
        }
        result
    }

    async fn submit_inner(&self, request: &SubmitVote) -> Result<SubmitReceipt, ReconcileError> {
        let now = self.clock.now();
        let reservation = BallotReservation {
            voter: request.voter.clone(),
            election: request.election.clone(),
            idempotency_key: request.idempotency_key.clone(),
            reserved_at: now,
            stale_after_secs: self.retry.stale_reservation_secs(),
        };

        // Replays answer even once the election has closed. An in-flight key
        // is left to `reserve_ballot`, which may find its reservation stale.
        if let Some(key) = &request.idempotency_key {
            if let Some(entry) = self.store.idempotency_entry(key)? {
                let committed = match &entry {
                    IdempotencyEntry::Committed(id) => Some(self.store.get_vote(id)?),
                    IdempotencyEntry::InFlight { .. } => None,
                };
                let outcome = idempotency_outcome(&entry, committed, &reservation);
                if outcome != ReserveOutcome::InFlight {
                    return self.settle_reservation(outcome, request);
                }
            }
        }

        let election = self
            .store
            .get_election(&request.election)
            .map_err(|e| not_found_as(e, || ReconcileError::ElectionNotFound(request.election.clone())))?;
        let status = election.status(now);
        if status != ElectionStatus::Active {
            return Err(ReconcileError::ElectionNotOpen {
                election: request.election.clone(),
                status,
            });
        }
        if election.candidate(&request.candidate).is_none() {
            return Err(ReconcileError::InvalidCandidate {
                election: request.election.clone(),
                candidate: request.candidate.clone(),
            });
        }

        let outcome = self.store.reserve_ballot(&reservation)?;
        if outcome != ReserveOutcome::Reserved {
            return self.settle_reservation(outcome, request);
        }
        let mut guard = ReservationGuard::new(self.store.clone(), request);

        let ballot = request.ballot();
        let tx_hash = self.submit_with_retry(&ballot).await?;

        let vote = Vote::pending(
            ballot,
            tx_hash,
            request.metadata.clone(),
            request.idempotency_key.clone(),
            now,
        );
        guard.submitted(vote.clone());
        self.commit_with_retry(&vote).await?;
        guard.disarm();

        self.metrics.votes_submitted.inc();
        self.metrics.votes_pending.inc();
        info!(vote = %vote.id, tx = %vote.tx_hash, candidate = %vote.candidate, "vote recorded");
        Ok(SubmitReceipt {
            vote,
            replayed: false,
        })
    }

    /// Map a non-`Reserved` reservation outcome to the caller's answer.
    fn settle_reservation(
        &self,
        outcome: ReserveOutcome,
        request: &SubmitVote,
    ) -> Result<SubmitReceipt, ReconcileError> {
        let key = || request.idempotency_key.clone();
        match outcome {
            ReserveOutcome::Replay(vote) => {
                debug!(vote = %vote.id, "idempotent replay");
                Ok(SubmitReceipt {
                    vote,
                    replayed: true,
                })
            }
            ReserveOutcome::Duplicate => Err(ReconcileError::DuplicateVote {
                voter: request.voter.clone(),
                election: request.election.clone(),
            }),
            ReserveOutcome::InFlight => match key() {
                Some(key) => Err(ReconcileError::SubmissionInProgress(key)),
                None => Err(internal("in-flight outcome without an idempotency key")),
            },
            ReserveOutcome::KeyConflict => match key() {
                Some(key) => Err(ReconcileError::IdempotencyConflict(key)),
                None => Err(internal("key conflict without an idempotency key")),
            },
            ReserveOutcome::Reserved => Err(internal("reservation settled twice")),
        }
    }

    async fn submit_with_retry(&self, ballot: &Ballot) -> Result<TxHash, ReconcileError> {
        let attempt_timeout = self.retry.attempt_timeout;
        let attempt = || async {
            match tokio::time::timeout(attempt_timeout, self.ledger.submit_ballot(ballot)).await {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Timeout),
            }
        };

        attempt
            .retry(self.retry.backoff())
            .when(LedgerError::is_transient)
            .notify(|err: &LedgerError, delay| {
                self.metrics.ledger_retries.inc();
                warn!(error = %err, ?delay, "ledger submission failed, retrying");
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "ledger submission gave up");
                ReconcileError::SubmissionFailed(e)
            })
    }

    async fn commit_with_retry(&self, vote: &Vote) -> Result<(), ReconcileError> {
        let commit = || async { self.store.commit_vote(vote) };

        commit
            .retry(self.retry.commit_backoff())
            .when(|e: &StoreError| !matches!(e, StoreError::Duplicate(_) | StoreError::Conflict(_)))
            .notify(|err: &StoreError, delay| {
                warn!(vote = %vote.id, error = %err, ?delay, "vote commit failed, retrying");
            })
            .await
            .map_err(|e| {
                warn!(vote = %vote.id, tx = %vote.tx_hash, error = %e, "vote commit gave up");
                ReconcileError::Store(e)
            })
    }

    /// Record votes the ledger accepted while the store refused to write
    /// them. Returns how many were adopted.
    pub fn adopt_stashed(&self) -> Result<usize, ReconcileError> {
        let mut adopted = 0;
        for vote in self.store.stashed_submissions()? {
            self.store.commit_vote(&vote)?;
            self.metrics.votes_submitted.inc();
            self.metrics.votes_pending.inc();
            info!(vote = %vote.id, tx = %vote.tx_hash, "stashed vote recorded");
            adopted += 1;
        }
        Ok(adopted)
    }

    // ── confirm ─────────────────────────────────────────────────────────

    /// Check a pending vote against the ledger and settle it when possible.
    ///
    /// Fails with [`ReconcileError::TransactionFailed`] when the vote is (or
    /// becomes) failed. Ledger errors leave the vote untouched. The
    /// confirmation timeout only fails transactions that never got mined; a
    /// mined one waits for its depth however long that takes.
    pub async fn confirm_vote(&self, id: &VoteId) -> Result<ConfirmOutcome, ReconcileError> {
        self.confirm_inner(id)
            .instrument(confirm_span(&id.to_string()))
            .await
    }

    async fn confirm_inner(&self, id: &VoteId) -> Result<ConfirmOutcome, ReconcileError> {
        let vote = self.vote_status(id)?;
        match vote.status {
            VerificationStatus::Verified => return Ok(ConfirmOutcome::AlreadyVerified(vote)),
            VerificationStatus::Failed => return Err(failed(vote)),
            VerificationStatus::Pending => {}
        }

        let status = self
            .query(self.ledger.transaction_status(&vote.tx_hash))
            .await?;
        match status {
            TxStatus::Mined(inclusion) => {
                let head = self.query(self.ledger.head_block()).await?;
                let depth = confirmations(head, inclusion.block_number);
                if depth >= self.confirmation.depth {
                    self.verify(vote, &inclusion).await
                } else {
                    debug!(vote = %vote.id, confirmations = depth, required = self.confirmation.depth, "vote mined, awaiting depth");
                    Ok(ConfirmOutcome::Pending {
                        vote,
                        confirmations: depth,
                    })
                }
            }
            TxStatus::Reverted(_) => self.fail(vote, REASON_REVERTED).await,
            TxStatus::Pending => self.pending_or_expired(vote, REASON_TIMED_OUT).await,
            TxStatus::Unknown => self.pending_or_expired(vote, REASON_DROPPED).await,
        }
    }

    /// Keep waiting for an unmined transaction, or fail it once too old.
    async fn pending_or_expired(
        &self,
        vote: Vote,
        reason: &str,
    ) -> Result<ConfirmOutcome, ReconcileError> {
        let now = self.clock.now();
        if vote
            .submitted_at
            .has_expired(self.confirmation.timeout_secs, now)
        {
            return self.fail(vote, reason).await;
        }
        debug!(vote = %vote.id, "vote transaction not mined yet");
        Ok(ConfirmOutcome::Pending {
            vote,
            confirmations: 0,
        })
    }

    async fn verify(
        &self,
        vote: Vote,
        inclusion: &Inclusion,
    ) -> Result<ConfirmOutcome, ReconcileError> {
        match self
            .store
            .mark_verified(&vote.id, inclusion, self.clock.now())?
        {
            Transition::Applied(vote) => {
                self.metrics.votes_verified.inc();
                self.metrics.votes_pending.dec();
                info!(
                    vote = %vote.id,
                    block = inclusion.block_number,
                    block_hash = %inclusion.block_hash,
                    "vote verified"
                );
                self.send_notification(NotificationKind::Verified, &vote, None)
                    .await;
                Ok(ConfirmOutcome::Verified(vote))
            }
            Transition::Unchanged(current) => settled_elsewhere(current),
        }
    }

    async fn fail(&self, vote: Vote, reason: &str) -> Result<ConfirmOutcome, ReconcileError> {
        match self
            .store
            .mark_failed(&vote.id, reason, self.clock.now())?
        {
            Transition::Applied(vote) => {
                self.metrics.votes_failed.inc();
                self.metrics.votes_pending.dec();
                warn!(vote = %vote.id, tx = %vote.tx_hash, reason, "vote failed");
                self.send_notification(NotificationKind::Failed, &vote, Some(reason))
                    .await;
                Err(failed(vote))
            }
            Transition::Unchanged(current) => settled_elsewhere(current),
        }
    }

    async fn send_notification(&self, kind: NotificationKind, vote: &Vote, reason: Option<&str>) {
        let (election_title, candidate_name) = match self.store.get_election(&vote.election) {
            Ok(election) => {
                let name = election
                    .candidate(&vote.candidate)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| vote.candidate.to_string());
                (election.title, name)
            }
            Err(_) => (vote.election.to_string(), vote.candidate.to_string()),
        };
        let notification = Notification {
            kind,
            vote: vote.id,
            voter: vote.voter.clone(),
            election: vote.election.clone(),
            election_title,
            candidate_name,
            tx_hash: vote.tx_hash,
            reason: reason.map(str::to_string),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(vote = %vote.id, error = %e, "failed to deliver vote notification");
        }
    }

    // ── audit ───────────────────────────────────────────────────────────

    /// Re-check a verified vote against the canonical chain.
    ///
    /// If its block was replaced or its transaction is no longer mined
    /// successfully in that block, the vote is invalidated (never deleted),
    /// the election counter drops by one and
    /// [`ReconcileError::ReorgDetected`] is returned.
    pub async fn audit_vote(&self, id: &VoteId) -> Result<AuditOutcome, ReconcileError> {
        self.audit_inner(id)
            .instrument(audit_span(&id.to_string()))
            .await
    }

    async fn audit_inner(&self, id: &VoteId) -> Result<AuditOutcome, ReconcileError> {
        let vote = self.vote_status(id)?;
        if vote.status != VerificationStatus::Verified {
            return Ok(AuditOutcome::NotVerified(vote));
        }
        if !vote.is_valid {
            return Ok(AuditOutcome::AlreadyInvalidated(vote));
        }

        match self.chain_mismatch(&vote).await? {
            None => {
                debug!(vote = %vote.id, "vote still canonical");
                Ok(AuditOutcome::Canonical(vote))
            }
            Some(reason) => match self.store.invalidate_vote(&vote.id, self.clock.now())? {
                Transition::Applied(vote) => {
                    self.metrics.votes_invalidated.inc();
                    warn!(
                        vote = %vote.id,
                        election = %vote.election,
                        tx = %vote.tx_hash,
                        %reason,
                        "reorg invalidated a verified vote"
                    );
                    Err(ReconcileError::ReorgDetected {
                        vote: Box::new(vote),
                        reason,
                    })
                }
                Transition::Unchanged(current) if !current.is_valid => {
                    Ok(AuditOutcome::AlreadyInvalidated(current))
                }
                Transition::Unchanged(current) => Ok(AuditOutcome::NotVerified(current)),
            },
        }
    }

    /// Why the vote's recorded inclusion no longer holds, if it doesn't.
    async fn chain_mismatch(&self, vote: &Vote) -> Result<Option<String>, ReconcileError> {
        let Some(recorded) = vote.inclusion() else {
            return Ok(Some("verified vote has no recorded block".to_string()));
        };

        let canonical = self
            .query(self.ledger.block_hash(recorded.block_number))
            .await?;
        if canonical != Some(recorded.block_hash) {
            return Ok(Some(format!(
                "block {} no longer has hash {}",
                recorded.block_number, recorded.block_hash
            )));
        }

        let status = self
            .query(self.ledger.transaction_status(&vote.tx_hash))
            .await?;
        Ok(match status {
            TxStatus::Mined(now)
                if now.block_number == recorded.block_number
                    && now.block_hash == recorded.block_hash =>
            {
                None
            }
            TxStatus::Mined(now) => Some(format!(
                "transaction moved to block {} ({})",
                now.block_number, now.block_hash
            )),
            TxStatus::Reverted(_) => Some("transaction now reverts".to_string()),
            TxStatus::Pending | TxStatus::Unknown => {
                Some("transaction no longer on the canonical chain".to_string())
            }
        })
    }

    // ── queries ─────────────────────────────────────────────────────────

    pub fn vote_status(&self, id: &VoteId) -> Result<Vote, ReconcileError> {
        self.store
            .get_vote(id)
            .map_err(|e| not_found_as(e, || ReconcileError::VoteNotFound(id.to_string())))
    }

    pub fn find_vote_by_tx(&self, tx_hash: &TxHash) -> Result<Option<Vote>, ReconcileError> {
        Ok(self.store.find_vote_by_tx(tx_hash)?)
    }

    /// Votes still awaiting confirmation.
    pub fn pending_votes(&self) -> Result<Vec<Vote>, ReconcileError> {
        Ok(self.store.votes_with_status(VerificationStatus::Pending)?)
    }

    /// Set the pending gauge from the store, e.g. after a restart.
    pub fn refresh_pending_gauge(&self) -> Result<usize, ReconcileError> {
        let pending = self.pending_votes()?.len();
        self.metrics
            .votes_pending
            .set(i64::try_from(pending).unwrap_or(i64::MAX));
        Ok(pending)
    }

    /// Ledger read bounded by the configured query timeout.
    async fn query<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.confirmation.query_timeout, call)
            .await
            .unwrap_or(Err(LedgerError::Timeout))
    }
}

fn failed(vote: Vote) -> ReconcileError {
    let reason = vote
        .failure_reason
        .clone()
        .unwrap_or_else(|| "unknown failure".to_string());
    ReconcileError::TransactionFailed {
        vote: Box::new(vote),
        reason,
    }
}

/// A concurrent caller settled the vote first; report its result.
fn settled_elsewhere(current: Vote) -> Result<ConfirmOutcome, ReconcileError> {
    match current.status {
        VerificationStatus::Verified => Ok(ConfirmOutcome::AlreadyVerified(current)),
        VerificationStatus::Failed => Err(failed(current)),
        VerificationStatus::Pending => Ok(ConfirmOutcome::Pending {
            vote: current,
            confirmations: 0,
        }),
    }
}

pub(crate) fn not_found_as(
    error: StoreError,
    mapped: impl FnOnce() -> ReconcileError,
) -> ReconcileError {
    match error {
        StoreError::NotFound(_) => mapped(),
        other => ReconcileError::Store(other),
    }
}

fn internal(message: &str) -> ReconcileError {
    ReconcileError::Store(StoreError::Corruption(message.to_string()))
}
