use serde::{Deserialize, Serialize};

/// A user's vote on one question. At most one exists per (user, question).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub user_id: i64,
    pub choice_id: i64,
    pub question_id: i64,
}

/// Body of `POST /polls/:id/vote`.
#[derive(Debug, Default, Deserialize)]
pub struct VoteRequest {
    pub choice: Option<i64>,
}

/// What a vote did to the stored ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Created,
    Changed { previous_choice: i64 },
    Unchanged,
}

impl VoteOutcome {
    /// Classify an upsert from the choice stored before it ran.
    pub fn from_previous(previous: Option<i64>, chosen: i64) -> Self {
        match previous {
            None => VoteOutcome::Created,
            Some(prev) if prev == chosen => VoteOutcome::Unchanged,
            Some(prev) => VoteOutcome::Changed { previous_choice: prev },
        }
    }
}
