use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Object, Pool, Runtime};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::Row;
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseConfig, WaitConfig};
use crate::error::ApiError;
use crate::fixtures::{FixtureObject, LoadSummary};
use crate::models::{
    Choice, CreateQuestionRequest, CreateUserRequest, PollResults, Question, Session, User,
    UserCredentials, Vote, VoteOutcome,
};
use crate::password;

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, is_staff, is_active, date_joined, last_login";

/// Schema statements, applied in order. Every statement is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "users table",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            username VARCHAR(150) NOT NULL CONSTRAINT users_username_key UNIQUE,
            password VARCHAR(255) NOT NULL,
            email VARCHAR(254),
            first_name VARCHAR(150) NOT NULL DEFAULT '',
            last_name VARCHAR(150) NOT NULL DEFAULT '',
            is_staff BOOLEAN NOT NULL DEFAULT FALSE,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            date_joined TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_login TIMESTAMPTZ
        )
        "#,
    ),
    (
        "sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token VARCHAR(64) PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "sessions expires_at index",
        "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
    ),
    (
        "questions table",
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id BIGSERIAL PRIMARY KEY,
            question_text VARCHAR(200) NOT NULL,
            pub_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            end_date TIMESTAMPTZ,
            CONSTRAINT questions_period_check CHECK (end_date IS NULL OR end_date >= pub_date)
        )
        "#,
    ),
    (
        "questions pub_date index",
        "CREATE INDEX IF NOT EXISTS idx_questions_pub_date ON questions(pub_date DESC)",
    ),
    (
        "choices table",
        r#"
        CREATE TABLE IF NOT EXISTS choices (
            id BIGSERIAL PRIMARY KEY,
            question_id BIGINT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            choice_text VARCHAR(200) NOT NULL,
            CONSTRAINT choices_id_question_key UNIQUE (id, question_id)
        )
        "#,
    ),
    (
        "choices question_id index",
        "CREATE INDEX IF NOT EXISTS idx_choices_question_id ON choices(question_id)",
    ),
    (
        // The composite key ties each vote's question to its choice's question
        "votes table",
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            choice_id BIGINT NOT NULL,
            question_id BIGINT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            CONSTRAINT votes_choice_fk FOREIGN KEY (choice_id, question_id)
                REFERENCES choices(id, question_id) ON DELETE CASCADE,
            CONSTRAINT votes_user_question_key UNIQUE (user_id, question_id)
        )
        "#,
    ),
    (
        "votes choice_id index",
        "CREATE INDEX IF NOT EXISTS idx_votes_choice_id ON votes(choice_id)",
    ),
];

/// Tables whose BIGSERIAL sequences must follow explicitly inserted ids.
const SEQUENCED_TABLES: &[&str] = &["users", "questions", "choices", "votes"];

/// Repository over a deadpool-postgres connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Build the pool and make sure the server answers.
    pub async fn new(config: DatabaseConfig) -> Result<Self, ApiError> {
        let db = Self::connect_lazy(config)?;
        db.health_check().await?;
        Ok(db)
    }

    /// Build the pool without opening a connection. Connections are created
    /// on first use.
    pub fn connect_lazy(config: DatabaseConfig) -> Result<Self, ApiError> {
        info!("Creating PostgreSQL connection pool for {}", config.redacted());
        let pool = Self::create_pool(config)?;
        Ok(Database { pool })
    }

    fn create_pool(config: DatabaseConfig) -> Result<Pool, ApiError> {
        let mut pg_config = Config::new();

        if let Some(url) = config.connection_string {
            pg_config.url = Some(url);
        } else {
            pg_config.host = Some(config.host);
            pg_config.port = Some(config.port);
            pg_config.dbname = Some(config.database);
            pg_config.user = Some(config.username);
            pg_config.password = Some(config.password);
        }

        pg_config.ssl_mode = Some(match config.ssl_mode.as_str() {
            "disable" => deadpool_postgres::SslMode::Disable,
            "require" => deadpool_postgres::SslMode::Require,
            "prefer" => deadpool_postgres::SslMode::Prefer,
            other => {
                warn!("Unknown SSL mode '{}', defaulting to 'prefer'", other);
                deadpool_postgres::SslMode::Prefer
            }
        });

        pg_config.connect_timeout = Some(config.connection_timeout);

        pg_config.manager = Some(deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        });

        let mut pool_config = deadpool_postgres::PoolConfig::new(config.max_connections as usize);
        pool_config.timeouts.wait = Some(config.connection_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);
        pool_config.timeouts.recycle = Some(config.connection_timeout);
        pg_config.pool = Some(pool_config);

        let tls_connector = TlsConnector::builder()
            .build()
            .map_err(|e| {
                error!("Failed to create TLS connector: {}", e);
                ApiError::Database(format!("TLS connector creation failed: {}", e))
            })?;
        let tls = MakeTlsConnector::new(tls_connector);

        pg_config.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| {
                error!("Failed to create connection pool: {}", e);
                ApiError::Database(format!("Connection pool creation failed: {}", e))
            })
    }

    async fn get_connection(&self) -> Result<Object, ApiError> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Run `SELECT 1` against a pooled connection.
    pub async fn health_check(&self) -> Result<(), ApiError> {
        let client = self.get_connection().await?;

        client.execute("SELECT 1", &[])
            .await
            .map_err(|e| {
                error!("Database health check failed: {}", e);
                ApiError::Database(format!("Health check failed: {}", e))
            })?;

        debug!("Database health check successful");
        Ok(())
    }

    /// Ping the database until it answers, at most `retries + 1` times.
    pub async fn wait_until_ready(&self, wait: WaitConfig) -> Result<(), ApiError> {
        let attempts = wait.retries + 1;
        let mut attempt = 1;

        loop {
            match self.health_check().await {
                Ok(()) => {
                    info!("Database is ready (attempt {}/{})", attempt, attempts);
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Database not ready (attempt {}/{}), retrying in {:?}: {}",
                        attempt, attempts, wait.interval, e
                    );
                    tokio::time::sleep(wait.interval).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Database still unavailable after {} attempts", attempts);
                    return Err(e);
                }
            }
        }
    }

    pub async fn migrate(&self) -> Result<(), ApiError> {
        info!("Running database migrations");

        let client = self.get_connection().await?;

        for (name, statement) in MIGRATIONS {
            client.batch_execute(statement)
                .await
                .map_err(|e| {
                    error!("Failed to apply migration '{}': {}", name, e);
                    ApiError::Database(format!("Migration '{}' failed: {}", name, e))
                })?;
            debug!("Applied migration: {}", name);
        }

        info!("Database migrations completed successfully");
        Ok(())
    }

    // Poll repository operations

    /// Questions whose publication date has passed, newest first.
    pub async fn list_published_questions(&self, now: DateTime<Utc>) -> Result<Vec<Question>, ApiError> {
        let client = self.get_connection().await?;
        let query = r#"
            SELECT id, question_text, pub_date, end_date
            FROM questions
            WHERE pub_date <= $1
            ORDER BY pub_date DESC, id DESC
        "#;

        let rows = client.query(query, &[&now]).await.map_err(ApiError::from)?;

        Ok(rows.iter().map(question_from_row).collect())
    }

    pub async fn find_question(&self, question_id: i64) -> Result<Option<Question>, ApiError> {
        let client = self.get_connection().await?;
        let query = "SELECT id, question_text, pub_date, end_date FROM questions WHERE id = $1";

        let row = client.query_opt(query, &[&question_id])
            .await
            .map_err(ApiError::from)?;

        Ok(row.as_ref().map(question_from_row))
    }

    pub async fn get_choices(&self, question_id: i64) -> Result<Vec<Choice>, ApiError> {
        let client = self.get_connection().await?;
        let query = "SELECT id, question_id, choice_text FROM choices WHERE question_id = $1 ORDER BY id";

        let rows = client.query(query, &[&question_id])
            .await
            .map_err(ApiError::from)?;

        Ok(rows.iter().map(choice_from_row).collect())
    }

    /// The choice, but only when it belongs to `question_id`.
    pub async fn find_choice(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>, ApiError> {
        let client = self.get_connection().await?;
        let query = "SELECT id, question_id, choice_text FROM choices WHERE id = $1 AND question_id = $2";

        let row = client.query_opt(query, &[&choice_id, &question_id])
            .await
            .map_err(ApiError::from)?;

        Ok(row.as_ref().map(choice_from_row))
    }

    /// Vote counts per choice, in choice order.
    pub async fn get_results(&self, question: Question) -> Result<PollResults, ApiError> {
        let client = self.get_connection().await?;
        let query = r#"
            SELECT c.id, c.question_id, c.choice_text, COUNT(v.id) AS votes
            FROM choices c
            LEFT JOIN votes v ON v.choice_id = c.id
            WHERE c.question_id = $1
            GROUP BY c.id, c.question_id, c.choice_text
            ORDER BY c.id
        "#;

        let rows = client.query(query, &[&question.id])
            .await
            .map_err(ApiError::from)?;

        let counts = rows
            .iter()
            .map(|row| (choice_from_row(row), row.get::<_, i64>(3)))
            .collect();

        Ok(PollResults::new(question, counts))
    }

    /// Insert a question and its choices in one transaction.
    pub async fn create_question(&self, request: CreateQuestionRequest) -> Result<(Question, Vec<Choice>), ApiError> {
        request.validate().map_err(ApiError::Validation)?;

        let question_text = request.get_normalized_text();
        let choice_texts = request.get_normalized_choices();
        let pub_date = request.pub_date.unwrap_or_else(Utc::now);

        let mut client = self.get_connection().await?;
        let tx = client.transaction().await.map_err(ApiError::from)?;

        let row = tx.query_one(
            r#"
            INSERT INTO questions (question_text, pub_date, end_date)
            VALUES ($1, $2, $3)
            RETURNING id, question_text, pub_date, end_date
            "#,
            &[&question_text, &pub_date, &request.end_date],
        )
        .await
        .map_err(ApiError::from)?;
        let question = question_from_row(&row);

        let mut choices = Vec::with_capacity(choice_texts.len());
        for text in &choice_texts {
            let row = tx.query_one(
                "INSERT INTO choices (question_id, choice_text) VALUES ($1, $2) RETURNING id, question_id, choice_text",
                &[&question.id, text],
            )
            .await
            .map_err(ApiError::from)?;
            choices.push(choice_from_row(&row));
        }

        tx.commit().await.map_err(ApiError::from)?;

        info!("Created question {} with {} choices", question.id, choices.len());
        Ok((question, choices))
    }

    // Vote repository operations

    pub async fn find_user_vote(&self, user_id: i64, question_id: i64) -> Result<Option<Vote>, ApiError> {
        let client = self.get_connection().await?;
        let query = "SELECT id, user_id, choice_id, question_id FROM votes WHERE user_id = $1 AND question_id = $2";

        let row = client.query_opt(query, &[&user_id, &question_id])
            .await
            .map_err(ApiError::from)?;

        Ok(row.map(|row| Vote {
            id: row.get(0),
            user_id: row.get(1),
            choice_id: row.get(2),
            question_id: row.get(3),
        }))
    }

    /// Map of question id to the choice this user picked.
    pub async fn user_votes(&self, user_id: i64) -> Result<HashMap<i64, i64>, ApiError> {
        let client = self.get_connection().await?;

        let rows = client.query("SELECT question_id, choice_id FROM votes WHERE user_id = $1", &[&user_id])
            .await
            .map_err(ApiError::from)?;

        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    /// Record the user's vote, replacing any earlier vote on the question.
    ///
    /// A single upsert on `(user_id, question_id)`, so concurrent requests
    /// from the same user can never leave two votes behind.
    pub async fn cast_vote(&self, user_id: i64, question_id: i64, choice_id: i64) -> Result<VoteOutcome, ApiError> {
        let client = self.get_connection().await?;
        let query = r#"
            WITH previous AS (
                SELECT choice_id FROM votes WHERE user_id = $1 AND question_id = $2
            ), upsert AS (
                INSERT INTO votes (user_id, question_id, choice_id)
                VALUES ($1, $2, $3)
                ON CONFLICT ON CONSTRAINT votes_user_question_key
                DO UPDATE SET choice_id = EXCLUDED.choice_id
                RETURNING id
            )
            SELECT (SELECT choice_id FROM previous), (SELECT id FROM upsert)
        "#;

        let row = client.query_one(query, &[&user_id, &question_id, &choice_id])
            .await
            .map_err(ApiError::from)?;

        let previous: Option<i64> = row.get(0);
        Ok(VoteOutcome::from_previous(previous, choice_id))
    }

    /// Remove the user's vote; returns the choice it pointed at.
    pub async fn clear_vote(&self, user_id: i64, question_id: i64) -> Result<Option<i64>, ApiError> {
        let client = self.get_connection().await?;

        let row = client.query_opt(
            "DELETE FROM votes WHERE user_id = $1 AND question_id = $2 RETURNING choice_id",
            &[&user_id, &question_id],
        )
        .await
        .map_err(ApiError::from)?;

        Ok(row.map(|row| row.get(0)))
    }

    // User repository operations

    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User, ApiError> {
        request.validate().map_err(ApiError::Validation)?;

        let username = request.get_normalized_username();
        let email = request.get_normalized_email();
        let password_hash = password::hash_password(&request.password)?;

        let client = self.get_connection().await?;
        let query = format!(
            r#"
            INSERT INTO users (username, password, email, first_name, last_name, is_staff)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = client.query_one(
            &query,
            &[&username, &password_hash, &email, &request.first_name, &request.last_name, &request.is_staff],
        )
        .await
        .map_err(ApiError::from)?;

        let user = user_from_row(&row);
        info!("Created user {} with id: {}", user.username, user.id);
        Ok(user)
    }

    pub async fn find_user_credentials(&self, username: &str) -> Result<Option<UserCredentials>, ApiError> {
        let client = self.get_connection().await?;
        let query = format!("SELECT {}, password FROM users WHERE username = $1", USER_COLUMNS);

        let row = client.query_opt(&query, &[&username])
            .await
            .map_err(ApiError::from)?;

        Ok(row.map(|row| UserCredentials {
            user: user_from_row(&row),
            password_hash: row.get(9),
        }))
    }

    pub async fn touch_last_login(&self, user_id: i64, now: DateTime<Utc>) -> Result<(), ApiError> {
        let client = self.get_connection().await?;

        client.execute("UPDATE users SET last_login = $1 WHERE id = $2", &[&now, &user_id])
            .await
            .map_err(ApiError::from)?;

        Ok(())
    }

    // Session repository operations

    pub async fn create_session(&self, user_id: i64, token: String, ttl: StdDuration) -> Result<Session, ApiError> {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Session lifetime {:?} is out of range", ttl)))?;

        let client = self.get_connection().await?;
        client.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4)",
            &[&token, &user_id, &created_at, &expires_at],
        )
        .await
        .map_err(ApiError::from)?;

        Ok(Session {
            token,
            user_id,
            created_at,
            expires_at,
        })
    }

    /// The active user owning an unexpired session.
    pub async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>, ApiError> {
        let client = self.get_connection().await?;
        let query = format!(
            r#"
            SELECT {}
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = $1 AND s.expires_at > $2 AND u.is_active
            "#,
            USER_COLUMNS
                .split(", ")
                .map(|column| format!("u.{}", column))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let row = client.query_opt(&query, &[&token, &now])
            .await
            .map_err(ApiError::from)?;

        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn delete_session(&self, token: &str) -> Result<bool, ApiError> {
        let client = self.get_connection().await?;

        let deleted = client.execute("DELETE FROM sessions WHERE token = $1", &[&token])
            .await
            .map_err(ApiError::from)?;

        Ok(deleted > 0)
    }

    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let client = self.get_connection().await?;

        let purged = client.execute("DELETE FROM sessions WHERE expires_at <= $1", &[&now])
            .await
            .map_err(ApiError::from)?;

        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }

    // Fixture loading

    /// Upsert fixture objects by primary key in one transaction, then move
    /// the id sequences past the loaded ids.
    pub async fn load_fixture(&self, objects: &[FixtureObject]) -> Result<LoadSummary, ApiError> {
        let mut summary = LoadSummary::default();

        let mut client = self.get_connection().await?;
        let tx = client.transaction().await.map_err(ApiError::from)?;

        for object in objects {
            match object {
                FixtureObject::User(user) => {
                    tx.execute(
                        r#"
                        INSERT INTO users (id, username, password, email, first_name, last_name,
                                           is_staff, is_active, date_joined, last_login)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        ON CONFLICT (id) DO UPDATE SET
                            username = EXCLUDED.username,
                            password = EXCLUDED.password,
                            email = EXCLUDED.email,
                            first_name = EXCLUDED.first_name,
                            last_name = EXCLUDED.last_name,
                            is_staff = EXCLUDED.is_staff,
                            is_active = EXCLUDED.is_active,
                            date_joined = EXCLUDED.date_joined,
                            last_login = EXCLUDED.last_login
                        "#,
                        &[
                            &user.id, &user.username, &user.password, &user.email, &user.first_name,
                            &user.last_name, &user.is_staff, &user.is_active, &user.date_joined, &user.last_login,
                        ],
                    )
                    .await
                    .map_err(ApiError::from)?;
                    summary.users += 1;
                }
                FixtureObject::Question(question) => {
                    tx.execute(
                        r#"
                        INSERT INTO questions (id, question_text, pub_date, end_date)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (id) DO UPDATE SET
                            question_text = EXCLUDED.question_text,
                            pub_date = EXCLUDED.pub_date,
                            end_date = EXCLUDED.end_date
                        "#,
                        &[&question.id, &question.question_text, &question.pub_date, &question.end_date],
                    )
                    .await
                    .map_err(ApiError::from)?;
                    summary.questions += 1;
                }
                FixtureObject::Choice(choice) => {
                    tx.execute(
                        r#"
                        INSERT INTO choices (id, question_id, choice_text)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (id) DO UPDATE SET
                            question_id = EXCLUDED.question_id,
                            choice_text = EXCLUDED.choice_text
                        "#,
                        &[&choice.id, &choice.question_id, &choice.choice_text],
                    )
                    .await
                    .map_err(ApiError::from)?;
                    summary.choices += 1;
                }
                FixtureObject::Vote(vote) => {
                    // The question is taken from the referenced choice
                    let inserted = tx.execute(
                        r#"
                        INSERT INTO votes (id, user_id, choice_id, question_id)
                        SELECT $1::BIGINT, $2::BIGINT, c.id, c.question_id
                        FROM choices c
                        WHERE c.id = $3
                        ON CONFLICT (id) DO UPDATE SET
                            user_id = EXCLUDED.user_id,
                            choice_id = EXCLUDED.choice_id,
                            question_id = EXCLUDED.question_id
                        "#,
                        &[&vote.id, &vote.user_id, &vote.choice_id],
                    )
                    .await
                    .map_err(ApiError::from)?;

                    if inserted == 0 {
                        return Err(ApiError::Validation(format!(
                            "Vote {} references missing choice {}",
                            vote.id, vote.choice_id
                        )));
                    }
                    summary.votes += 1;
                }
                FixtureObject::Unsupported(model) => {
                    warn!("Skipping fixture record of unsupported model '{}'", model);
                    summary.skipped += 1;
                }
            }
        }

        for table in SEQUENCED_TABLES {
            let reset = format!(
                "SELECT setval(pg_get_serial_sequence('{table}', 'id'), \
                 COALESCE((SELECT MAX(id) FROM {table}), 1), \
                 (SELECT MAX(id) IS NOT NULL FROM {table}))",
                table = table
            );
            tx.execute(reset.as_str(), &[]).await.map_err(ApiError::from)?;
        }

        tx.commit().await.map_err(ApiError::from)?;

        info!(
            "Loaded {} fixture objects ({} users, {} questions, {} choices, {} votes, {} skipped)",
            summary.total(), summary.users, summary.questions, summary.choices, summary.votes, summary.skipped
        );
        Ok(summary)
    }
}

fn question_from_row(row: &Row) -> Question {
    Question {
        id: row.get(0),
        question_text: row.get(1),
        pub_date: row.get(2),
        end_date: row.get(3),
    }
}

fn choice_from_row(row: &Row) -> Choice {
    Choice {
        id: row.get(0),
        question_id: row.get(1),
        choice_text: row.get(2),
    }
}

// Column order follows USER_COLUMNS
fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0),
        username: row.get(1),
        email: row.get(2),
        first_name: row.get(3),
        last_name: row.get(4),
        is_staff: row.get(5),
        is_active: row.get(6),
        date_joined: row.get(7),
        last_login: row.get(8),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Repository tests that need PostgreSQL run against `TEST_DATABASE_URL`
    //! (falling back to `DATABASE_URL`) and return early when neither is set.

    use chrono::{DateTime, Utc};
    use tokio::sync::Mutex;

    use super::Database;
    use crate::config::DatabaseConfig;
    use crate::models::{Choice, CreateQuestionRequest, CreateUserRequest, Question, User};

    static MIGRATED: Mutex<bool> = Mutex::const_new(false);

    pub(crate) async fn database() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());
        let Some(url) = url else {
            eprintln!("TEST_DATABASE_URL is not set, skipping PostgreSQL test");
            return None;
        };

        let no_overrides = |_: &str| -> Option<String> { None };
        let config = DatabaseConfig::from_connection_string(&no_overrides, &url)
            .expect("TEST_DATABASE_URL must be a postgres:// URL");
        let db = Database::connect_lazy(config).expect("pool creation is offline");

        let mut migrated = MIGRATED.lock().await;
        if !*migrated {
            db.migrate().await.expect("migrations apply");
            *migrated = true;
        }
        Some(db)
    }

    /// Names are unique per call so tests can share one database.
    pub(crate) fn unique_name(prefix: &str) -> String {
        format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
    }

    pub(crate) async fn create_user(db: &Database, password: &str, is_staff: bool) -> User {
        let mut request = CreateUserRequest::new(unique_name("voter"), password);
        request.is_staff = is_staff;
        db.create_user(request).await.expect("user is created")
    }

    pub(crate) async fn create_question(
        db: &Database,
        pub_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        choices: &[&str],
    ) -> (Question, Vec<Choice>) {
        let request = CreateQuestionRequest {
            question_text: unique_name("question"),
            pub_date: Some(pub_date),
            end_date,
            choices: choices.iter().map(|c| c.to_string()).collect(),
        };
        db.create_question(request).await.expect("question is created")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_every_table() {
        let statements: Vec<&str> = MIGRATIONS.iter().map(|(_, sql)| *sql).collect();
        for table in ["users", "sessions", "questions", "choices", "votes"] {
            let create = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(
                statements.iter().any(|sql| sql.contains(&create)),
                "missing table {}",
                table
            );
        }
        assert!(statements.iter().all(|sql| sql.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_one_vote_per_user_and_question_is_a_constraint() {
        let votes = MIGRATIONS
            .iter()
            .find(|(name, _)| *name == "votes table")
            .map(|(_, sql)| *sql)
            .unwrap();
        assert!(votes.contains("CONSTRAINT votes_user_question_key UNIQUE (user_id, question_id)"));
    }

    fn offline_database() -> Database {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            database: "polls".to_string(),
            username: "polls".to_string(),
            password: "polls".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 2,
            connection_timeout: StdDuration::from_secs(1),
            connection_string: None,
        };
        Database::connect_lazy(config).expect("pool creation is offline")
    }

    #[tokio::test]
    async fn test_connect_lazy_does_not_touch_the_server() {
        let db = offline_database();
        let wait = WaitConfig { retries: 1, interval: StdDuration::from_millis(10) };
        assert!(db.wait_until_ready(wait).await.is_err());
    }

    #[tokio::test]
    async fn test_session_lifetime_overflow_is_an_error() {
        let db = offline_database();

        for ttl in [StdDuration::from_secs(360_000_000_000_000), StdDuration::MAX] {
            let err = db.create_session(1, "token".to_string(), ttl).await.unwrap_err();
            assert!(matches!(err, ApiError::Internal(_)), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_vote_upsert_outcomes() {
        let Some(db) = test_support::database().await else { return };
        let voter = test_support::create_user(&db, "pw", false).await;
        let (question, choices) =
            test_support::create_question(&db, Utc::now() - chrono::Duration::hours(1), None, &["Tabs", "Spaces"]).await;
        let (tabs, spaces) = (choices[0].id, choices[1].id);

        assert_eq!(db.cast_vote(voter.id, question.id, tabs).await.unwrap(), VoteOutcome::Created);
        assert_eq!(db.cast_vote(voter.id, question.id, tabs).await.unwrap(), VoteOutcome::Unchanged);
        assert_eq!(
            db.cast_vote(voter.id, question.id, spaces).await.unwrap(),
            VoteOutcome::Changed { previous_choice: tabs }
        );

        let vote = db.find_user_vote(voter.id, question.id).await.unwrap().unwrap();
        assert_eq!(vote.choice_id, spaces);
        assert_eq!(db.user_votes(voter.id).await.unwrap().get(&question.id), Some(&spaces));

        let results = db.get_results(question).await.unwrap();
        assert_eq!(results.total_votes, 1);
        assert_eq!(results.choices[0].votes, 0);
        assert_eq!(results.choices[1].votes, 1);
        assert_eq!(results.choices[1].percent, 100.0);
    }

    #[tokio::test]
    async fn test_concurrent_votes_leave_one_ballot() {
        let Some(db) = test_support::database().await else { return };
        let voter = test_support::create_user(&db, "pw", false).await;
        let (question, choices) =
            test_support::create_question(&db, Utc::now(), None, &["a", "b", "c"]).await;

        let (a, b, c) = tokio::join!(
            db.cast_vote(voter.id, question.id, choices[0].id),
            db.cast_vote(voter.id, question.id, choices[1].id),
            db.cast_vote(voter.id, question.id, choices[2].id),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let results = db.get_results(question).await.unwrap();
        assert_eq!(results.total_votes, 1);
    }

    #[tokio::test]
    async fn test_vote_for_choice_of_another_question_is_rejected() {
        let Some(db) = test_support::database().await else { return };
        let voter = test_support::create_user(&db, "pw", false).await;
        let (question, _) = test_support::create_question(&db, Utc::now(), None, &["yes"]).await;
        let (_, foreign) = test_support::create_question(&db, Utc::now(), None, &["no"]).await;

        let err = db.cast_vote(voter.id, question.id, foreign[0].id).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{:?}", err);
        assert!(db.find_user_vote(voter.id, question.id).await.unwrap().is_none());
        assert!(db.find_choice(question.id, foreign[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_vote() {
        let Some(db) = test_support::database().await else { return };
        let voter = test_support::create_user(&db, "pw", false).await;
        let (question, choices) = test_support::create_question(&db, Utc::now(), None, &["x", "y"]).await;

        assert_eq!(db.clear_vote(voter.id, question.id).await.unwrap(), None);

        db.cast_vote(voter.id, question.id, choices[1].id).await.unwrap();
        assert_eq!(db.clear_vote(voter.id, question.id).await.unwrap(), Some(choices[1].id));
        assert_eq!(db.clear_vote(voter.id, question.id).await.unwrap(), None);
        assert!(db.find_user_vote(voter.id, question.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let Some(db) = test_support::database().await else { return };
        let user = test_support::create_user(&db, "pw", false).await;
        let token = crate::session::new_token();

        let session = db.create_session(user.id, token.clone(), StdDuration::from_secs(3600)).await.unwrap();
        assert_eq!(session.expires_at - session.created_at, chrono::Duration::hours(1));

        let found = db.find_session_user(&token, Utc::now()).await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));

        let later = session.expires_at + chrono::Duration::seconds(1);
        assert!(db.find_session_user(&token, later).await.unwrap().is_none());

        assert!(db.delete_session(&token).await.unwrap());
        assert!(!db.delete_session(&token).await.unwrap());
        assert!(db.find_session_user(&token, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fixture_reload_is_idempotent() {
        let Some(db) = test_support::database().await else { return };
        // Ids far above anything the sequences hand out in tests
        let objects = crate::fixtures::parse_fixture(
            r#"[
            {"model": "auth.user", "pk": 910001, "fields": {"username": "fixture_voter_910001",
                "password": "pbkdf2_sha256$1000$salt$AAAA", "is_active": true,
                "date_joined": "2024-09-01T10:00:00Z"}},
            {"model": "polls.question", "pk": 910001, "fields": {"question_text": "Fixture poll",
                "pub_date": "2024-09-01T00:00:00Z", "end_date": null}},
            {"model": "polls.choice", "pk": 910001, "fields": {"question": 910001, "choice_text": "Left", "votes": 3}},
            {"model": "polls.choice", "pk": 910002, "fields": {"question": 910001, "choice_text": "Right"}},
            {"model": "polls.vote", "pk": 910001, "fields": {"user": 910001, "choice": 910002}},
            {"model": "sessions.session", "pk": null, "fields": {}}
        ]"#,
        )
        .unwrap();

        let first = db.load_fixture(&objects).await.unwrap();
        let second = db.load_fixture(&objects).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            LoadSummary { users: 1, questions: 1, choices: 2, votes: 1, skipped: 1 }
        );

        assert_eq!(db.get_choices(910001).await.unwrap().len(), 2);
        let vote = db.find_user_vote(910001, 910001).await.unwrap().unwrap();
        assert_eq!(vote.choice_id, 910002);

        let question = db.find_question(910001).await.unwrap().unwrap();
        assert_eq!(db.get_results(question).await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn test_fixture_vote_with_unknown_choice_is_rejected() {
        let Some(db) = test_support::database().await else { return };
        let objects = vec![FixtureObject::Vote(crate::fixtures::VoteFixture {
            id: 919999,
            user_id: 1,
            choice_id: 919999,
        })];

        let err = db.load_fixture(&objects).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{:?}", err);
    }
}
