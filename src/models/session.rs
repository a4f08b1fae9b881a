use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side login session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
