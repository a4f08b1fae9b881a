use serde::{Deserialize, Serialize};

use super::question::Question;

/// One answer a question offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
}

/// A choice with the number of votes it received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceTally {
    #[serde(flatten)]
    pub choice: Choice,
    pub votes: i64,
    pub percent: f64,
}

/// Public results for a question
#[derive(Debug, Clone, Serialize)]
pub struct PollResults {
    pub question: Question,
    pub choices: Vec<ChoiceTally>,
    pub total_votes: i64,
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.choice_text)
    }
}

impl PollResults {
    /// Turn raw `(choice, votes)` counts into results with percentages
    /// rounded to one decimal place.
    pub fn new(question: Question, counts: Vec<(Choice, i64)>) -> Self {
        let total_votes: i64 = counts.iter().map(|(_, votes)| *votes).sum();

        let choices = counts
            .into_iter()
            .map(|(choice, votes)| {
                let percent = if total_votes == 0 {
                    0.0
                } else {
                    (votes as f64 * 1000.0 / total_votes as f64).round() / 10.0
                };
                ChoiceTally { choice, votes, percent }
            })
            .collect();

        PollResults {
            question,
            choices,
            total_votes,
        }
    }
}
