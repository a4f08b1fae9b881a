// Library root for the polls server

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fixtures;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod session;

// Re-export commonly used types
pub use app::{create_router, AppState};
pub use config::Config;
pub use db::Database;
pub use error::ApiError;
pub use models::{Choice, Question, User, Vote};
