// Poll handlers
// Listing, voting and results for poll questions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::{
    app::AppState,
    auth::{CurrentUser, MaybeUser},
    error::ApiError,
    models::{
        Choice, CreateQuestionRequest, PollResults, Question, QuestionDetail, QuestionSummary,
        VoteOutcome, VoteRequest,
    },
};

pub const NO_POLLS: &str = "No polls are available.";
pub const POLL_NOT_FOUND: &str = "The poll does not exist.";
pub const VOTING_CLOSED: &str = "Voting is not available for the poll.";
pub const NO_CHOICE: &str = "You didn't select a choice.";
pub const NOT_VOTED: &str = "You haven't voted.";

#[derive(Debug, Serialize)]
pub struct PollIndex {
    pub questions: Vec<QuestionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedQuestion {
    pub question: Question,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub message: String,
    pub outcome: VoteOutcome,
    pub results: PollResults,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub cleared_choice: i64,
}

/// Load a question that is visible to the public.
async fn published_question(state: &AppState, question_id: i64) -> Result<Question, ApiError> {
    state
        .db
        .find_question(question_id)
        .await?
        .filter(|q| q.is_published())
        .ok_or_else(|| ApiError::not_found(POLL_NOT_FOUND))
}

fn ensure_open(question: &Question) -> Result<(), ApiError> {
    if question.can_vote() {
        Ok(())
    } else {
        Err(ApiError::forbidden(VOTING_CLOSED))
    }
}

/// List published questions, newest first
/// GET /polls
pub async fn index(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let questions = state.db.list_published_questions(now).await?;

    let votes = match &current {
        Some(current) => state.db.user_votes(current.user.id).await?,
        None => Default::default(),
    };

    let questions: Vec<QuestionSummary> = questions
        .into_iter()
        .map(|question| {
            let user_choice = votes.get(&question.id).copied();
            QuestionSummary {
                can_vote: question.can_vote_at(now),
                user_voted: user_choice.is_some(),
                user_choice,
                question,
            }
        })
        .collect();

    let message = questions.is_empty().then(|| NO_POLLS.to_string());
    Ok((StatusCode::OK, Json(PollIndex { questions, message })))
}

/// Create a question with its choices (staff only)
/// POST /polls
pub async fn create_question(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_staff()?;

    let (question, choices) = state.db.create_question(request).await?;

    info!(
        "user:{} created question:{} with {} choices",
        current.user.username,
        question.id,
        choices.len()
    );
    Ok((StatusCode::CREATED, Json(CreatedQuestion { question, choices })))
}

/// Voting form for one question
/// GET /polls/:id
pub async fn detail(
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let question = published_question(&state, question_id).await?;
    ensure_open(&question)?;

    let choices = state.db.get_choices(question.id).await?;
    let current_choice = state
        .db
        .find_user_vote(current.user.id, question.id)
        .await?
        .map(|vote| vote.choice_id);

    let message = current_choice
        .and_then(|id| choices.iter().find(|c| c.id == id))
        .map(|choice| format!("Your current choice is '{}'", choice));

    Ok((
        StatusCode::OK,
        Json(QuestionDetail {
            question,
            choices,
            current_choice,
            message,
        }),
    ))
}

/// Vote counts for one question
/// GET /polls/:id/results
pub async fn results(
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let question = published_question(&state, question_id).await?;
    let results = state.db.get_results(question).await?;
    Ok((StatusCode::OK, Json(results)))
}

/// Record or change the current user's vote
/// POST /polls/:id/vote
pub async fn vote(
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
    current: CurrentUser,
    payload: Option<Json<VoteRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let question = published_question(&state, question_id).await?;
    ensure_open(&question)?;

    let Json(request) = payload.unwrap_or_default();
    let choice_id = request.choice.ok_or_else(|| ApiError::validation(NO_CHOICE))?;
    let choice = state
        .db
        .find_choice(question.id, choice_id)
        .await?
        .ok_or_else(|| ApiError::validation(NO_CHOICE))?;

    let outcome = state.db.cast_vote(current.user.id, question.id, choice.id).await?;
    info!(
        "user:{} vote for choice:{} in question:{}",
        current.user.username, choice.id, question.id
    );

    let results = state.db.get_results(question).await?;
    Ok((
        StatusCode::OK,
        Json(VoteResponse {
            message: format!("Your vote is now '{}'", choice),
            outcome,
            results,
        }),
    ))
}

/// Remove the current user's vote
/// POST /polls/:id/clear
pub async fn clear(
    State(state): State<AppState>,
    Path(question_id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let question = state
        .db
        .find_question(question_id)
        .await?
        .ok_or_else(|| ApiError::not_found(POLL_NOT_FOUND))?;

    let cleared_choice = state
        .db
        .clear_vote(current.user.id, question.id)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_VOTED))?;

    info!(
        "user:{} cleared vote for choice:{} in question:{}",
        current.user.username, cleared_choice, question.id
    );
    Ok((
        StatusCode::OK,
        Json(ClearResponse {
            message: "Your vote has been cleared.".to_string(),
            cleared_choice,
        }),
    ))
}
