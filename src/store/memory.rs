//! In-memory store used by tests and local runs without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AccountStore, PostStore, StoreError};
use crate::models::{Account, NewAccount, NewPost, Post, DEFAULT_IMAGE_FILE};
use crate::pagination::{Page, PageRequest};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    posts: BTreeMap<i64, StoredPost>,
    next_account_id: i64,
    next_post_id: i64,
}

#[derive(Debug, Clone)]
struct StoredPost {
    post: NewPost,
}

impl Tables {
    fn join(&self, id: i64, stored: &StoredPost) -> Post {
        let author = self
            .accounts
            .get(&stored.post.author_id)
            .map(|a| a.username.clone())
            .unwrap_or_default();

        Post {
            id,
            title: stored.post.title.clone(),
            content: stored.post.content.clone(),
            date_posted: stored.post.date_posted,
            author_id: stored.post.author_id,
            author,
        }
    }

    fn page_where(&self, request: PageRequest, keep: impl Fn(&StoredPost) -> bool) -> Page<Post> {
        let mut matching: Vec<(i64, &StoredPost)> = self
            .posts
            .iter()
            .filter(|(_, p)| keep(p))
            .map(|(id, p)| (*id, p))
            .collect();

        // newest first, id breaks ties
        matching.sort_by(|a, b| {
            b.1.post
                .date_posted
                .cmp(&a.1.post.date_posted)
                .then(b.0.cmp(&a.0))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .map(|(id, p)| self.join(id, p))
            .collect();

        Page::new(items, request, total)
    }

    fn check_unique(&self, id: Option<i64>, username: &str, email: &str) -> Result<(), StoreError> {
        for other in self.accounts.values() {
            if Some(other.id) == id {
                continue;
            }
            if other.username == username {
                return Err(StoreError::Conflict { field: "username" });
            }
            if other.email == email {
                return Err(StoreError::Conflict { field: "email" });
            }
        }
        Ok(())
    }
}

/// Thread-safe map-backed store with the same semantics as [`PgStore`](super::PgStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.read().accounts.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .tables
            .read()
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .tables
            .read()
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.tables.write();
        tables.check_unique(None, &account.username, &account.email)?;

        tables.next_account_id += 1;
        let created = Account {
            id: tables.next_account_id,
            username: account.username,
            email: account.email,
            image_file: DEFAULT_IMAGE_FILE.to_string(),
            password_hash: account.password_hash,
            failed_attempt_count: 0,
            locked_until: None,
        };
        tables.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if !tables.accounts.contains_key(&account.id) {
            return Err(StoreError::NotFound);
        }
        tables.check_unique(Some(account.id), &account.username, &account.email)?;
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn insert_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let mut tables = self.tables.write();
        if !tables.accounts.contains_key(&post.author_id) {
            return Err(StoreError::NotFound);
        }

        tables.next_post_id += 1;
        let id = tables.next_post_id;
        let stored = StoredPost { post };
        let joined = tables.join(id, &stored);
        tables.posts.insert(id, stored);
        Ok(joined)
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.posts.get(&id).map(|p| tables.join(id, p)))
    }

    async fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Post, StoreError> {
        let mut tables = self.tables.write();
        let stored = tables.posts.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.post.title = title.to_string();
        stored.post.content = content.to_string();
        let stored = stored.clone();
        Ok(tables.join(id, &stored))
    }

    async fn delete_post(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables.write().posts.remove(&id).is_some())
    }

    async fn recent_posts(&self, request: PageRequest) -> Result<Page<Post>, StoreError> {
        Ok(self.tables.read().page_where(request, |_| true))
    }

    async fn posts_by_author(
        &self,
        author_id: i64,
        request: PageRequest,
    ) -> Result<Page<Post>, StoreError> {
        Ok(self
            .tables
            .read()
            .page_where(request, |p| p.post.author_id == author_id))
    }
}
