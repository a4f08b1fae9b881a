use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    response::Redirect,
    routing::{get, post},
    Router,
};

use crate::{
    config::Config,
    db::Database,
    handlers::{self, accounts, polls},
    middleware::{create_middleware_stack, enforce_allowed_hosts, AllowedHosts},
    session::SessionSigner,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub signer: SessionSigner,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
    pub allowed_hosts: Arc<AllowedHosts>,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> Self {
        AppState {
            db: Arc::new(db),
            signer: SessionSigner::new(&config.secret_key),
            session_ttl: config.session_ttl,
            secure_cookies: config.session_cookie_secure,
            allowed_hosts: Arc::new(AllowedHosts::new(&config.allowed_hosts, config.debug)),
        }
    }
}

/// Build the application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let allowed_hosts = state.allowed_hosts.clone();

    Router::new()
        .route("/", get(|| async { Redirect::to("/polls") }))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/polls", get(polls::index).post(polls::create_question))
        .route("/polls/:id", get(polls::detail))
        .route("/polls/:id/results", get(polls::results))
        .route("/polls/:id/vote", post(polls::vote))
        .route("/polls/:id/clear", post(polls::clear))
        .route("/accounts/login", post(accounts::login))
        .route("/accounts/logout", post(accounts::logout))
        .with_state(state)
        .layer(from_fn_with_state(allowed_hosts, enforce_allowed_hosts))
        .layer(create_middleware_stack())
}
