//! Django `dumpdata` fixtures.
//!
//! A fixture file is a JSON array of `{"model", "pk", "fields"}` records.
//! Records are converted into typed objects here; writing them is done by
//! [`crate::db::Database::load_fixture`].

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawRecord {
    model: String,
    pk: Option<i64>,
    #[serde(default)]
    fields: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserFixture {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionFixture {
    pub id: i64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceFixture {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteFixture {
    pub id: i64,
    pub user_id: i64,
    pub choice_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixtureObject {
    User(UserFixture),
    Question(QuestionFixture),
    Choice(ChoiceFixture),
    Vote(VoteFixture),
    Unsupported(String),
}

/// Counts reported by `loaddata`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub users: usize,
    pub questions: usize,
    pub choices: usize,
    pub votes: usize,
    pub skipped: usize,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.users + self.questions + self.choices + self.votes
    }

    pub fn merge(&mut self, other: LoadSummary) {
        self.users += other.users;
        self.questions += other.questions;
        self.choices += other.choices;
        self.votes += other.votes;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Deserialize)]
struct UserFields {
    username: String,
    password: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    is_staff: bool,
    #[serde(default)]
    is_superuser: bool,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    date_joined: Option<String>,
    #[serde(default)]
    last_login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionFields {
    question_text: String,
    pub_date: String,
    #[serde(default)]
    end_date: Option<String>,
}

// Older fixtures still carry a `votes` counter; it is derived now.
#[derive(Debug, Deserialize)]
struct ChoiceFields {
    question: i64,
    choice_text: String,
}

#[derive(Debug, Deserialize)]
struct VoteFields {
    user: i64,
    choice: i64,
}

fn default_true() -> bool {
    true
}

/// Parse the contents of one fixture file.
pub fn parse_fixture(contents: &str) -> Result<Vec<FixtureObject>> {
    let records: Vec<RawRecord> =
        serde_json::from_str(contents).context("Fixture must be a JSON array of records")?;

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let model = record.model.clone();
            convert(record).with_context(|| format!("Invalid record #{} ({})", index, model))
        })
        .collect()
}

pub fn read_fixture(path: &Path) -> Result<Vec<FixtureObject>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    parse_fixture(&contents).with_context(|| format!("Failed to parse fixture {}", path.display()))
}

fn convert(record: RawRecord) -> Result<FixtureObject> {
    let model = record.model.to_ascii_lowercase();
    let known = matches!(model.as_str(), "auth.user" | "polls.question" | "polls.choice" | "polls.vote");
    if !known {
        return Ok(FixtureObject::Unsupported(record.model));
    }

    let id = record.pk.context("Record is missing a primary key")?;

    let object = match model.as_str() {
        "auth.user" => {
            let fields: UserFields = serde_json::from_value(record.fields)?;
            FixtureObject::User(UserFixture {
                id,
                username: fields.username,
                password: fields.password,
                email: fields.email.filter(|e| !e.trim().is_empty()),
                first_name: fields.first_name,
                last_name: fields.last_name,
                is_staff: fields.is_staff || fields.is_superuser,
                is_active: fields.is_active,
                date_joined: match fields.date_joined {
                    Some(raw) => parse_datetime(&raw)?,
                    None => Utc::now(),
                },
                last_login: fields.last_login.as_deref().map(parse_datetime).transpose()?,
            })
        }
        "polls.question" => {
            let fields: QuestionFields = serde_json::from_value(record.fields)?;
            FixtureObject::Question(QuestionFixture {
                id,
                question_text: fields.question_text,
                pub_date: parse_datetime(&fields.pub_date)?,
                end_date: fields.end_date.as_deref().map(parse_datetime).transpose()?,
            })
        }
        "polls.choice" => {
            let fields: ChoiceFields = serde_json::from_value(record.fields)?;
            FixtureObject::Choice(ChoiceFixture {
                id,
                question_id: fields.question,
                choice_text: fields.choice_text,
            })
        }
        _ => {
            let fields: VoteFields = serde_json::from_value(record.fields)?;
            FixtureObject::Vote(VoteFixture {
                id,
                user_id: fields.user,
                choice_id: fields.choice,
            })
        }
    };

    Ok(object)
}

/// Accepts RFC 3339 and the naive form Django writes with `USE_TZ = False`
/// (interpreted as UTC).
pub fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    anyhow::bail!("Invalid datetime '{}'", raw)
}
