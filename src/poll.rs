// src/poll.rs
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Poll, VoteRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub option_id: String,
    pub text: String,
    pub votes: u64,
}

/// A catalog poll together with its projected counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: String,
    pub question: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub options: Vec<PollResult>,
    pub total_votes: u64,
}

/// Count the active votes per option, in the poll's option order.
///
/// Released records and records for other polls are ignored. Nothing is
/// cached: every call reflects exactly the records it is given.
pub fn compute_results(poll: &Poll, votes: &[VoteRecord]) -> Vec<PollResult> {
    poll.options
        .iter()
        .map(|option| PollResult {
            option_id: option.id.clone(),
            text: option.text.clone(),
            votes: votes
                .iter()
                .filter(|v| v.is_active() && v.poll_id == poll.id && v.option_id == option.id)
                .count() as u64,
        })
        .collect()
}

pub fn project(poll: Poll, votes: &[VoteRecord]) -> PollView {
    let options = compute_results(&poll, votes);
    let total_votes = options.iter().map(|r| r.votes).sum();
    PollView {
        id: poll.id,
        question: poll.question,
        is_active: poll.is_active,
        created_at: poll.created_at,
        options,
        total_votes,
    }
}
