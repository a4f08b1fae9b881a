// Account handlers
// Session login and logout

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    app::AppState,
    auth::MaybeUser,
    error::ApiError,
    models::{LoginRequest, User},
    password,
    session,
};

pub const BAD_CREDENTIALS: &str = "Please enter a correct username and password.";

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    /// Signed session value, usable as a bearer token.
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Authenticate and open a session
/// POST /accounts/login
pub async fn login(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = session::client_ip(&headers, remote.map(|ConnectInfo(addr)| addr));
    let username = request.username.trim();

    let credentials = state.db.find_user_credentials(username).await?;
    let user = match credentials {
        Some(credentials) if credentials.user.is_active => {
            match password::verify_password(&request.password, &credentials.password_hash) {
                Ok(true) => Some(credentials.user),
                Ok(false) => None,
                Err(e) => {
                    error!("Stored password for {} is unreadable: {:#}", username, e);
                    None
                }
            }
        }
        _ => None,
    };

    let Some(user) = user else {
        warn!("login failed for: {} via ip: {}", username, ip);
        return Err(ApiError::unauthorized(BAD_CREDENTIALS));
    };

    let login = state
        .db
        .create_session(user.id, session::new_token(), state.session_ttl)
        .await?;
    state.db.touch_last_login(user.id, login.created_at).await?;

    let signed = state.signer.sign(&login.token);
    let cookie = session::login_cookie(&signed, state.session_ttl, state.secure_cookies);

    info!("login user: {} via ip: {} (session expires {})", user, ip, login.expires_at);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse { user, token: signed }),
    ))
}

/// End the current session, if any
/// POST /accounts/logout
pub async fn logout(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    MaybeUser(current): MaybeUser,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(current) = current {
        state.db.delete_session(&current.token).await?;
        let ip = session::client_ip(&headers, remote.map(|ConnectInfo(addr)| addr));
        info!("logout user: {} via ip: {}", current.user, ip);
    }

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session::logout_cookie())],
        Json(LogoutResponse {
            message: "You have been logged out.".to_string(),
        }),
    ))
}
