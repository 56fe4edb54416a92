// src/store.rs
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::VoteResult;
use crate::models::{AuditLogEntry, Poll, VoteRecord};

/// Storage capability the voting engine is built on: the poll catalog plus
/// the two append-only tables (votes, audit).
///
/// Reads return rows in ledger append order. The two write methods are the
/// only mutations and each one commits its vote change together with its
/// audit entry, or nothing at all.
#[async_trait]
pub trait Store: Send + Sync {
    async fn polls(&self) -> VoteResult<Vec<Poll>>;

    async fn poll(&self, poll_id: &str) -> VoteResult<Option<Poll>>;

    async fn votes_for_poll(&self, poll_id: &str) -> VoteResult<Vec<VoteRecord>>;

    async fn votes_for_identity(
        &self,
        poll_id: &str,
        identity: &str,
    ) -> VoteResult<Vec<VoteRecord>>;

    async fn audit_for_poll(&self, poll_id: &str) -> VoteResult<Vec<AuditLogEntry>>;

    /// Append an unreleased vote and its audit entry.
    ///
    /// Fails with `AlreadyVoted` if an unreleased vote for the same
    /// (poll, identity) pair is already present at commit time.
    async fn record_vote(&self, vote: &VoteRecord, entry: &AuditLogEntry) -> VoteResult<()>;

    /// Mark `vote_id` released and append its audit entry.
    ///
    /// Fails with `NoActiveVote` if the vote is missing or already released.
    async fn release_vote(&self, vote_id: Uuid, entry: &AuditLogEntry) -> VoteResult<()>;
}
