// src/catalog.rs
use chrono::Utc;

use crate::models::{Poll, PollOption};

/// Polls every fresh store starts with.
pub fn default_polls() -> Vec<Poll> {
    let now = Utc::now();
    vec![
        Poll {
            id: "poll_1".to_string(),
            question: "Which frontend framework do you prefer?".to_string(),
            options: vec![
                PollOption::new("opt_1", "React"),
                PollOption::new("opt_2", "Vue"),
                PollOption::new("opt_3", "Angular"),
                PollOption::new("opt_4", "Svelte"),
            ],
            is_active: true,
            created_at: now,
        },
        Poll {
            id: "poll_2".to_string(),
            question: "What is your favorite backend language?".to_string(),
            options: vec![
                PollOption::new("opt_a", "PHP"),
                PollOption::new("opt_b", "Node.js"),
                PollOption::new("opt_c", "Python"),
                PollOption::new("opt_d", "Go"),
            ],
            is_active: true,
            created_at: now,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn option_ids_are_unique_within_each_poll() {
        for poll in default_polls() {
            let ids: HashSet<_> = poll.options.iter().map(|o| o.id.as_str()).collect();
            assert_eq!(ids.len(), poll.options.len(), "duplicate option in {}", poll.id);
        }
    }

    #[test]
    fn poll_lookup_by_option() {
        let polls = default_polls();
        assert_eq!(polls[0].option("opt_3").map(|o| o.text.as_str()), Some("Angular"));
        assert!(polls[0].option("opt_a").is_none());
    }
}
