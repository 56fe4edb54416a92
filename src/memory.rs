// src/memory.rs
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::catalog::default_polls;
use crate::error::{VoteError, VoteResult};
use crate::models::{AuditLogEntry, Poll, VoteRecord};
use crate::store::Store;

/// In-process store for tests, local demos, and running without a database.
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    polls: Vec<Poll>,
    votes: Vec<VoteRecord>,
    audit: Vec<AuditLogEntry>,
}

impl MemoryStore {
    pub fn new(polls: Vec<Poll>) -> Self {
        Self {
            inner: RwLock::new(Tables {
                polls,
                ..Tables::default()
            }),
        }
    }

    /// A store holding the default catalog and no votes.
    pub fn seeded() -> Self {
        Self::new(default_polls())
    }

    fn read(&self) -> VoteResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| VoteError::Storage("memory store read lock poisoned".into()))
    }

    fn write(&self) -> VoteResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| VoteError::Storage("memory store write lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::seeded()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn polls(&self) -> VoteResult<Vec<Poll>> {
        Ok(self.read()?.polls.clone())
    }

    async fn poll(&self, poll_id: &str) -> VoteResult<Option<Poll>> {
        Ok(self.read()?.polls.iter().find(|p| p.id == poll_id).cloned())
    }

    async fn votes_for_poll(&self, poll_id: &str) -> VoteResult<Vec<VoteRecord>> {
        Ok(self
            .read()?
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn votes_for_identity(
        &self,
        poll_id: &str,
        identity: &str,
    ) -> VoteResult<Vec<VoteRecord>> {
        Ok(self
            .read()?
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id && v.identity == identity)
            .cloned()
            .collect())
    }

    async fn audit_for_poll(&self, poll_id: &str) -> VoteResult<Vec<AuditLogEntry>> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|a| a.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn record_vote(&self, vote: &VoteRecord, entry: &AuditLogEntry) -> VoteResult<()> {
        let mut tables = self.write()?;
        let locked = tables
            .votes
            .iter()
            .any(|v| v.poll_id == vote.poll_id && v.identity == vote.identity && v.is_active());
        if locked {
            return Err(VoteError::AlreadyVoted {
                poll_id: vote.poll_id.clone(),
                identity: vote.identity.clone(),
            });
        }

        tables.votes.push(vote.clone());
        tables.audit.push(entry.clone());
        Ok(())
    }

    async fn release_vote(&self, vote_id: Uuid, entry: &AuditLogEntry) -> VoteResult<()> {
        let mut tables = self.write()?;
        let vote = tables
            .votes
            .iter_mut()
            .find(|v| v.id == vote_id && v.is_active())
            .ok_or_else(|| VoteError::NoActiveVote {
                poll_id: entry.poll_id.clone(),
                identity: entry.identity.clone(),
            })?;

        vote.released = true;
        tables.audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use chrono::Utc;

    fn vote_with_entry(identity: &str) -> (VoteRecord, AuditLogEntry) {
        let now = Utc::now();
        let vote = VoteRecord::new("poll_1", "opt_1", identity, now);
        let entry = AuditLogEntry::new(AuditAction::Vote, "poll_1", identity, "Voted for: React".into(), now);
        (vote, entry)
    }

    #[tokio::test]
    async fn seeded_store_has_default_catalog() {
        let store = MemoryStore::seeded();
        let polls = store.polls().await.unwrap();
        assert_eq!(polls.len(), 2);
        assert!(store.poll("poll_2").await.unwrap().is_some());
        assert!(store.poll("poll_9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_vote_refuses_second_active_row() {
        let store = MemoryStore::seeded();
        let (first, entry) = vote_with_entry("1.1.1.1");
        store.record_vote(&first, &entry).await.unwrap();

        let (second, entry) = vote_with_entry("1.1.1.1");
        let err = store.record_vote(&second, &entry).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyVoted { .. }));

        assert_eq!(store.votes_for_poll("poll_1").await.unwrap().len(), 1);
        assert_eq!(store.audit_for_poll("poll_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn release_vote_flips_flag_once() {
        let store = MemoryStore::seeded();
        let (vote, entry) = vote_with_entry("2.2.2.2");
        store.record_vote(&vote, &entry).await.unwrap();

        let release = AuditLogEntry::new(
            AuditAction::Release,
            "poll_1",
            "2.2.2.2",
            format!("Admin released IP. Previous Vote ID: {}", vote.id),
            Utc::now(),
        );
        store.release_vote(vote.id, &release).await.unwrap();
        let err = store.release_vote(vote.id, &release).await.unwrap_err();
        assert!(matches!(err, VoteError::NoActiveVote { .. }));

        let votes = store.votes_for_identity("poll_1", "2.2.2.2").await.unwrap();
        assert!(votes[0].released);
        assert_eq!(store.audit_for_poll("poll_1").await.unwrap().len(), 2);
    }
}
