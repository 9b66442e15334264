//! Persistence seams for accounts and posts.
//!
//! Each call is individually atomic. Read-modify-write sequences on an
//! account are serialized by the caller through
//! [`AccountLocks`](crate::auth::AccountLocks).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{
    create_pool, health_check, run_migrations, DatabaseConfig, DatabaseConfigBuilder,
    DatabaseError, HealthStatus, PgStore, SslMode,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Account, NewAccount, NewPost, Post};
use crate::pagination::{Page, PageRequest};

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique column already holds this value
    #[error("{field} already in use")]
    Conflict { field: &'static str },

    /// The row to update no longer exists
    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, StoreError>;

    /// Email is the login identifier.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    /// Insert a new account with a zero failure counter and no lock.
    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError>;

    /// Overwrite every mutable field of an existing account.
    async fn save(&self, account: &Account) -> Result<(), StoreError>;
}

/// Blog posts, always returned with the author's username.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert_post(&self, post: NewPost) -> Result<Post, StoreError>;

    async fn find_post(&self, id: i64) -> Result<Option<Post>, StoreError>;

    /// Replace title and content.
    async fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Post, StoreError>;

    /// Returns false if the post did not exist.
    async fn delete_post(&self, id: i64) -> Result<bool, StoreError>;

    /// All posts, newest first.
    async fn recent_posts(&self, request: PageRequest) -> Result<Page<Post>, StoreError>;

    /// One author's posts, newest first.
    async fn posts_by_author(
        &self,
        author_id: i64,
        request: PageRequest,
    ) -> Result<Page<Post>, StoreError>;
}
