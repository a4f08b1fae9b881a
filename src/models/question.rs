use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::choice::Choice;

pub const QUESTION_TEXT_MAX: usize = 200;
pub const CHOICE_TEXT_MAX: usize = 200;

/// A poll question.
///
/// A question is visible once `pub_date` has passed and accepts votes until
/// `end_date`, when one is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Request structure for creating a question together with its choices
#[derive(Debug, Deserialize)]
pub struct CreateQuestionRequest {
    pub question_text: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Index page entry: the question plus what the current user did with it.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionSummary {
    #[serde(flatten)]
    pub question: Question,
    pub can_vote: bool,
    pub user_voted: bool,
    pub user_choice: Option<i64>,
}

/// Detail page payload for an authenticated voter.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetail {
    pub question: Question,
    pub choices: Vec<Choice>,
    pub current_choice: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Question {
    /// Build an unsaved question published now with no end date.
    pub fn new(question_text: impl Into<String>) -> Self {
        Question {
            id: 0,
            question_text: question_text.into(),
            pub_date: Utc::now(),
            end_date: None,
        }
    }

    pub fn was_published_recently_at(&self, now: DateTime<Utc>) -> bool {
        now - Duration::days(1) <= self.pub_date && self.pub_date <= now
    }

    pub fn was_published_recently(&self) -> bool {
        self.was_published_recently_at(Utc::now())
    }

    pub fn is_published_at(&self, now: DateTime<Utc>) -> bool {
        self.pub_date <= now
    }

    pub fn is_published(&self) -> bool {
        self.is_published_at(Utc::now())
    }

    /// Voting is open between `pub_date` and `end_date`, both inclusive.
    /// Without an end date the question stays open once published.
    pub fn can_vote_at(&self, now: DateTime<Utc>) -> bool {
        match self.end_date {
            Some(end) => self.is_published_at(now) && now <= end,
            None => self.is_published_at(now),
        }
    }

    pub fn can_vote(&self) -> bool {
        self.can_vote_at(Utc::now())
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.question_text)
    }
}

impl CreateQuestionRequest {
    pub fn validate(&self) -> Result<(), String> {
        let text = self.question_text.trim();
        if text.is_empty() {
            return Err("Question text cannot be empty".to_string());
        }

        if text.chars().count() > QUESTION_TEXT_MAX {
            return Err(format!("Question text cannot exceed {} characters", QUESTION_TEXT_MAX));
        }

        if let (Some(pub_date), Some(end_date)) = (self.pub_date, self.end_date) {
            if end_date < pub_date {
                return Err("End date cannot be before the publication date".to_string());
            }
        }

        if self.choices.is_empty() {
            return Err("A question needs at least one choice".to_string());
        }

        for choice in &self.choices {
            let choice = choice.trim();
            if choice.is_empty() {
                return Err("Choice text cannot be empty".to_string());
            }
            if choice.chars().count() > CHOICE_TEXT_MAX {
                return Err(format!("Choice text cannot exceed {} characters", CHOICE_TEXT_MAX));
            }
        }

        Ok(())
    }

    pub fn get_normalized_text(&self) -> String {
        self.question_text.trim().to_string()
    }

    pub fn get_normalized_choices(&self) -> Vec<String> {
        self.choices.iter().map(|c| c.trim().to_string()).collect()
    }
}
