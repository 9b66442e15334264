//! Persistent records: accounts and posts.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Avatar assigned to every new account.
pub const DEFAULT_IMAGE_FILE: &str = "default.jpg";

/// A registered user.
///
/// `failed_attempt_count` and `locked_until` belong to the lockout guard;
/// nothing else writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub image_file: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub failed_attempt_count: u32,
    #[serde(skip_serializing)]
    pub locked_until: Option<DateTime<Utc>>,
}

impl Account {
    /// Whether a lock is in force at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if now <= until)
    }
}

/// Fields supplied at registration.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// A blog post with its author's username joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub date_posted: DateTime<Utc>,
    pub author_id: i64,
    pub author: String,
}

/// Fields supplied when creating a post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub author_id: i64,
    pub date_posted: DateTime<Utc>,
}
