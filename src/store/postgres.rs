//! PostgreSQL persistence.
//!
//! Pool construction follows a conservative profile: small pool, bounded
//! acquire timeout, recycled connections and SSL required unless the
//! environment says otherwise.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{info, warn};

use super::{AccountStore, PostStore, StoreError};
use crate::config::{env_duration, env_flag, env_parse, ConfigError};
use crate::models::{Account, NewAccount, NewPost, Post};
use crate::pagination::{Page, PageRequest};

// ============================================================================
// Pool configuration
// ============================================================================

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL (`DATABASE_URL`)
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Maximum wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Connections older than this are closed
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    pub ssl_mode: SslMode,
    /// CA certificate for verify-ca / verify-full
    pub ssl_root_cert: Option<String>,
    /// Apply embedded migrations at startup
    pub auto_migrate: bool,
}

/// SSL/TLS mode for database connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never use SSL (local development only)
    Disable,
    /// Use SSL if the server offers it
    Prefer,
    /// Require SSL
    #[default]
    Require,
    /// Require SSL and verify the server certificate
    VerifyCa,
    /// Require SSL and verify certificate and hostname
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" | "verifyca" => Ok(Self::VerifyCa),
            "verify-full" | "verifyfull" => Ok(Self::VerifyFull),
            other => Err(DatabaseError::Configuration(format!(
                "unknown DB_SSL_MODE '{other}'"
            ))),
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            ssl_mode: SslMode::Require,
            ssl_root_cert: None,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `DB_MAX_CONNECTIONS`: Max pool size (default: 10)
    /// - `DB_MIN_CONNECTIONS`: Min idle connections (default: 1)
    /// - `DB_ACQUIRE_TIMEOUT`: Connection acquire timeout (default: "30s")
    /// - `DB_MAX_LIFETIME`: Max connection lifetime (default: "30m")
    /// - `DB_IDLE_TIMEOUT`: Idle connection timeout (default: "10m")
    /// - `DB_SSL_MODE`: disable|prefer|require|verify-ca|verify-full (default: require)
    /// - `DB_SSL_ROOT_CERT`: CA certificate path
    /// - `DB_AUTO_MIGRATE`: Run migrations on startup (default: true)
    pub fn from_env() -> Result<Self, DatabaseError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| DatabaseError::Configuration("DATABASE_URL must be set".into()))?;
        let defaults = Self::default();

        let ssl_mode = match std::env::var("DB_SSL_MODE") {
            Ok(s) => s.parse()?,
            Err(_) => defaults.ssl_mode,
        };

        Ok(Self {
            database_url,
            max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: env_parse("DB_MIN_CONNECTIONS", defaults.min_connections)?,
            acquire_timeout: env_duration("DB_ACQUIRE_TIMEOUT", defaults.acquire_timeout)?,
            max_lifetime: env_duration("DB_MAX_LIFETIME", defaults.max_lifetime)?,
            idle_timeout: env_duration("DB_IDLE_TIMEOUT", defaults.idle_timeout)?,
            ssl_mode,
            ssl_root_cert: std::env::var("DB_SSL_ROOT_CERT").ok(),
            auto_migrate: env_flag("DB_AUTO_MIGRATE", defaults.auto_migrate),
        })
    }

    pub fn builder(database_url: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(database_url)
    }

    pub fn requires_ssl(&self) -> bool {
        !matches!(self.ssl_mode, SslMode::Disable | SslMode::Prefer)
    }
}

/// Builder for DatabaseConfig
#[derive(Debug, Clone)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            config: DatabaseConfig {
                database_url: database_url.into(),
                ..Default::default()
            },
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.config.ssl_mode = mode;
        self
    }

    pub fn without_auto_migrate(mut self) -> Self {
        self.config.auto_migrate = false;
        self
    }

    pub fn build(self) -> DatabaseConfig {
        self.config
    }
}

/// Pool setup and health failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database configuration error: {0}")]
    Configuration(String),
    #[error("database connection error: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("database health check failed: {0}")]
    HealthCheck(#[source] sqlx::Error),
    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Env(#[from] ConfigError),
}

/// Create a connection pool and verify it answers queries.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        ssl_mode = ?config.ssl_mode,
        auto_migrate = config.auto_migrate,
        "Initializing database connection pool"
    );

    let mut connect_options = PgConnectOptions::from_str(&config.database_url)
        .map_err(|e| DatabaseError::Configuration(format!("invalid DATABASE_URL: {e}")))?
        .ssl_mode(config.ssl_mode.into());

    if let Some(ref root_cert) = config.ssl_root_cert {
        connect_options = connect_options.ssl_root_cert(root_cert);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
        .map_err(DatabaseError::Connection)?;

    health_check(&pool).await?;

    crate::security_event!(
        crate::observability::SecurityEvent::DatabaseConnected,
        pool_size = pool.size(),
        "Database connection pool initialized"
    );

    Ok(pool)
}

/// Database health status
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub ssl_enabled: bool,
    pub latency: Duration,
    pub pool_size: u32,
    pub idle_connections: u32,
}

/// Run a trivial query and report SSL state.
pub async fn health_check(pool: &PgPool) -> Result<HealthStatus, DatabaseError> {
    let start = std::time::Instant::now();

    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(DatabaseError::HealthCheck)?;

    let ssl_enabled: bool = sqlx::query_scalar(
        "SELECT COALESCE((SELECT ssl FROM pg_stat_ssl WHERE pid = pg_backend_pid()), false)",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(false);

    let status = HealthStatus {
        ssl_enabled,
        latency: start.elapsed(),
        pool_size: pool.size(),
        idle_connections: pool.num_idle() as u32,
    };

    if status.ssl_enabled {
        info!(latency_ms = status.latency.as_millis() as u64, "Database health check passed (SSL enabled)");
    } else {
        warn!(latency_ms = status.latency.as_millis() as u64, "Database health check passed (SSL NOT enabled)");
    }

    Ok(status)
}

/// Apply the embedded migrations in `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    username: String,
    email: String,
    image_file: String,
    password_hash: String,
    failed_attempt_count: i32,
    locked_until: Option<DateTime<Utc>>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            image_file: row.image_file,
            password_hash: row.password_hash,
            failed_attempt_count: u32::try_from(row.failed_attempt_count).unwrap_or(0),
            locked_until: row.locked_until,
        }
    }
}

#[derive(Debug, FromRow)]
struct PostRow {
    id: i64,
    title: String,
    content: String,
    date_posted: DateTime<Utc>,
    author_id: i64,
    author: String,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            content: row.content,
            date_posted: row.date_posted,
            author_id: row.author_id,
            author: row.author,
        }
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, username, email, image_file, password_hash, failed_attempt_count, locked_until";

const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.date_posted, p.author_id, \
     u.username AS author FROM posts p JOIN users u ON u.id = p.author_id";

/// Map unique-constraint violations onto [`StoreError::Conflict`].
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            let field = match db.constraint() {
                Some("users_username_key") => "username",
                Some("users_email_key") => "email",
                _ => "value",
            };
            return StoreError::Conflict { field };
        }
    }
    StoreError::Database(err)
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// ============================================================================
// Store
// ============================================================================

/// `sqlx` backed implementation of both store traits.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn page(
        &self,
        author_id: Option<i64>,
        request: PageRequest,
    ) -> Result<Page<Post>, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE $1::BIGINT IS NULL OR author_id = $1",
        )
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "{POST_SELECT} WHERE $1::BIGINT IS NULL OR p.author_id = $1 \
             ORDER BY p.date_posted DESC, p.id DESC LIMIT $2 OFFSET $3"
        );
        let rows: Vec<PostRow> = sqlx::query_as(&sql)
            .bind(author_id)
            .bind(to_i64(request.limit()))
            .bind(to_i64(request.offset()))
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(
            rows.into_iter().map(Post::from).collect(),
            request,
            u64::try_from(total).unwrap_or(0),
        ))
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE username = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(row.into())
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let count = i32::try_from(account.failed_attempt_count).unwrap_or(i32::MAX);
        let result = sqlx::query(
            "UPDATE users SET username = $2, email = $3, image_file = $4, password_hash = $5, \
             failed_attempt_count = $6, locked_until = $7 WHERE id = $1",
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.image_file)
        .bind(&account.password_hash)
        .bind(count)
        .bind(account.locked_until)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl PostStore for PgStore {
    async fn insert_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (title, content, date_posted, author_id) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.date_posted)
        .bind(post.author_id)
        .fetch_one(&self.pool)
        .await?;

        self.find_post(id).await?.ok_or(StoreError::NotFound)
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        let sql = format!("{POST_SELECT} WHERE p.id = $1");
        let row: Option<PostRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Post::from))
    }

    async fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Post, StoreError> {
        let result = sqlx::query("UPDATE posts SET title = $2, content = $3 WHERE id = $1")
            .bind(id)
            .bind(title)
            .bind(content)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.find_post(id).await?.ok_or(StoreError::NotFound)
    }

    async fn delete_post(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_posts(&self, request: PageRequest) -> Result<Page<Post>, StoreError> {
        self.page(None, request).await
    }

    async fn posts_by_author(
        &self,
        author_id: i64,
        request: PageRequest,
    ) -> Result<Page<Post>, StoreError> {
        self.page(Some(author_id), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parse() {
        assert_eq!("verify-full".parse::<SslMode>().unwrap(), SslMode::VerifyFull);
        assert_eq!("DISABLE".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert!("sometimes".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = DatabaseConfig::builder("postgres://localhost/blog")
            .max_connections(4)
            .without_auto_migrate()
            .build();

        assert_eq!(config.max_connections, 4);
        assert!(!config.auto_migrate);
        assert!(config.requires_ssl());
    }

    #[test]
    fn test_account_row_conversion() {
        let row = AccountRow {
            id: 7,
            username: "corey".into(),
            email: "corey@blog.com".into(),
            image_file: "default.jpg".into(),
            password_hash: "hash".into(),
            failed_attempt_count: 4,
            locked_until: None,
        };
        let account = Account::from(row);
        assert_eq!(account.failed_attempt_count, 4);
        assert_eq!(account.id, 7);
    }
}
