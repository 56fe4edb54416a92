// src/history.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AuditLogEntry, VoteRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Locked,
    Released,
}

/// One row of the moderation view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityStatus {
    pub identity: String,
    pub status: LockState,
    pub last_vote_at: DateTime<Utc>,
    pub option_id: String,
}

/// Everything recorded for one poll: the full vote ledger in append order
/// and the audit trail newest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct History {
    pub votes: Vec<VoteRecord>,
    pub audit: Vec<AuditLogEntry>,
}

impl History {
    /// `votes` and `audit` must be in append order.
    pub fn new(votes: Vec<VoteRecord>, mut audit: Vec<AuditLogEntry>) -> Self {
        // Reverse first so the stable sort keeps later appends ahead on equal timestamps.
        audit.reverse();
        audit.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self { votes, audit }
    }

    /// Status of each identity that ever voted, in order of first vote.
    ///
    /// An identity is locked when its most recent record is unreleased.
    /// Records with equal timestamps are ordered by ledger position.
    pub fn identity_statuses(&self) -> Vec<IdentityStatus> {
        let mut latest: Vec<&VoteRecord> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for vote in &self.votes {
            match index.get(vote.identity.as_str()) {
                Some(&i) => {
                    if vote.created_at >= latest[i].created_at {
                        latest[i] = vote;
                    }
                }
                None => {
                    index.insert(vote.identity.as_str(), latest.len());
                    latest.push(vote);
                }
            }
        }

        latest
            .into_iter()
            .map(|v| IdentityStatus {
                identity: v.identity.clone(),
                status: if v.is_active() {
                    LockState::Locked
                } else {
                    LockState::Released
                },
                last_vote_at: v.created_at,
                option_id: v.option_id.clone(),
            })
            .collect()
    }
}
