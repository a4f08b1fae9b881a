// Request authentication
// Extractors that resolve the signed session cookie to a user

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::Utc;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    models::User,
    session,
};

pub const LOGIN_REQUIRED: &str = "Please log in first!";

/// The logged-in user. Rejects with 401 when there is no valid session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

/// Like [`CurrentUser`] but never rejects anonymous requests.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl CurrentUser {
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.user.is_staff {
            Ok(())
        } else {
            Err(ApiError::forbidden("Staff access required"))
        }
    }
}

async fn resolve(parts: &Parts, state: &AppState) -> ApiResult<Option<CurrentUser>> {
    let Some(value) = session::extract_session_value(&parts.headers) else {
        return Ok(None);
    };

    let Some(token) = state.signer.verify(&value) else {
        tracing::debug!("Rejected session cookie with a bad signature");
        return Ok(None);
    };

    let user = state.db.find_session_user(token, Utc::now()).await?;

    Ok(user.map(|user| CurrentUser {
        user,
        token: token.to_string(),
    }))
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .await?
            .ok_or_else(|| ApiError::unauthorized(LOGIN_REQUIRED))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await.map(MaybeUser)
    }
}
