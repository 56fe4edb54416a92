// src/engine.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{VoteError, VoteResult};
use crate::history::History;
use crate::models::{AuditAction, AuditLogEntry, VoteRecord};
use crate::poll::{self, PollResult, PollView};
use crate::store::Store;

/// Serializes writers per (poll, identity) so the lock check and the append
/// happen as one step within this process.
#[derive(Default)]
struct IdentityLocks {
    slots: StdMutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    async fn acquire(&self, poll_id: &str, identity: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop slots nobody holds or waits on.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry((poll_id.to_string(), identity.to_string()))
                .or_default()
                .clone()
        };
        slot.lock_owned().await
    }
}

/// What a successful write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub action: AuditAction,
    pub vote_id: Uuid,
    pub audit_id: Uuid,
    pub message: String,
}

/// The voting state machine. The only writer of the vote ledger and the
/// audit log.
pub struct VotingEngine {
    store: Arc<dyn Store>,
    locks: IdentityLocks,
}

impl VotingEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: IdentityLocks::default(),
        }
    }

    pub async fn list_polls(&self) -> VoteResult<Vec<PollView>> {
        let polls = self.store.polls().await?;
        let mut views = Vec::with_capacity(polls.len());
        for p in polls {
            let votes = self.store.votes_for_poll(&p.id).await?;
            views.push(poll::project(p, &votes));
        }
        debug!(count = views.len(), "Listed polls");
        Ok(views)
    }

    pub async fn results(&self, poll_id: &str) -> VoteResult<Vec<PollResult>> {
        let poll = self
            .store
            .poll(poll_id)
            .await?
            .ok_or_else(|| VoteError::PollNotFound(poll_id.to_string()))?;
        let votes = self.store.votes_for_poll(poll_id).await?;
        Ok(poll::compute_results(&poll, &votes))
    }

    pub async fn history(&self, poll_id: &str) -> VoteResult<History> {
        if self.store.poll(poll_id).await?.is_none() {
            return Err(VoteError::PollNotFound(poll_id.to_string()));
        }
        let votes = self.store.votes_for_poll(poll_id).await?;
        let audit = self.store.audit_for_poll(poll_id).await?;
        Ok(History::new(votes, audit))
    }

    /// Cast a vote for `option_id` on behalf of `identity`.
    ///
    /// Checks run in order (poll exists, option belongs to poll, no active
    /// vote) and the first failure is returned with nothing written.
    pub async fn cast_vote(
        &self,
        poll_id: &str,
        option_id: &str,
        identity: &str,
    ) -> VoteResult<Transition> {
        let poll = self.store.poll(poll_id).await?.ok_or_else(|| {
            warn!(poll_id, identity, "Vote rejected: unknown poll");
            VoteError::PollNotFound(poll_id.to_string())
        })?;

        let option = poll.option(option_id).ok_or_else(|| {
            warn!(poll_id, option_id, identity, "Vote rejected: unknown option");
            VoteError::OptionNotFound {
                poll_id: poll_id.to_string(),
                option_id: option_id.to_string(),
            }
        })?;

        let _guard = self.locks.acquire(poll_id, identity).await;

        let previous = self.store.votes_for_identity(poll_id, identity).await?;
        if previous.iter().any(VoteRecord::is_active) {
            warn!(poll_id, identity, "Vote rejected: identity already holds an active vote");
            return Err(VoteError::AlreadyVoted {
                poll_id: poll_id.to_string(),
                identity: identity.to_string(),
            });
        }

        let (action, details) = if previous.iter().any(|v| v.released) {
            (AuditAction::Revote, format!("Revoted. New Option: {}", option.text))
        } else {
            (AuditAction::Vote, format!("Voted for: {}", option.text))
        };

        let now = Utc::now();
        let vote = VoteRecord::new(poll_id, option_id, identity, now);
        let entry = AuditLogEntry::new(action, poll_id, identity, details, now);
        self.store.record_vote(&vote, &entry).await?;

        info!(poll_id, option_id, identity, %action, vote_id = %vote.id, "Vote recorded");
        Ok(Transition {
            action,
            vote_id: vote.id,
            audit_id: entry.id,
            message: "Vote cast successfully.".to_string(),
        })
    }

    /// Release the active vote held by `identity` so it may vote again.
    ///
    /// If several active votes are found the newest is released, the change
    /// is committed, and `IntegrityFault` is returned so the duplicate is seen.
    pub async fn release_identity(&self, poll_id: &str, identity: &str) -> VoteResult<Transition> {
        let _guard = self.locks.acquire(poll_id, identity).await;

        let previous = self.store.votes_for_identity(poll_id, identity).await?;
        let active: Vec<&VoteRecord> = previous.iter().filter(|v| v.is_active()).collect();
        // max_by_key keeps the last maximum, i.e. the later append on equal timestamps.
        let target = active
            .iter()
            .copied()
            .max_by_key(|v| v.created_at)
            .ok_or_else(|| {
                warn!(poll_id, identity, "Release rejected: no active vote");
                VoteError::NoActiveVote {
                    poll_id: poll_id.to_string(),
                    identity: identity.to_string(),
                }
            })?;

        let entry = AuditLogEntry::new(
            AuditAction::Release,
            poll_id,
            identity,
            format!("Admin released IP. Previous Vote ID: {}", target.id),
            Utc::now(),
        );
        self.store.release_vote(target.id, &entry).await?;

        if active.len() > 1 {
            error!(
                poll_id,
                identity,
                active = active.len(),
                released_vote = %target.id,
                "Integrity fault: identity held more than one active vote"
            );
            return Err(VoteError::IntegrityFault {
                poll_id: poll_id.to_string(),
                identity: identity.to_string(),
                active: active.len(),
                released_vote: target.id,
            });
        }

        info!(poll_id, identity, vote_id = %target.id, "Identity released");
        Ok(Transition {
            action: AuditAction::Release,
            vote_id: target.id,
            audit_id: entry.id,
            message: "IP released successfully.".to_string(),
        })
    }
}
