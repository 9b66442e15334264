//! HTTP routes. Every body is JSON.

mod home;
mod posts;
mod users;

use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Post;
use crate::pagination::{Page, PageRequest, PageView};
use crate::AppState;

/// All routes, without state or middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(home::router())
        .merge(users::router())
        .merge(posts::router())
}

/// Plain acknowledgement body.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub(crate) fn message(text: impl Into<String>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.into(),
    })
}

/// `?page=N` on listings.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    /// A missing or non-numeric page means page 1; zero or negative is 404.
    pub(crate) fn request(&self, per_page: u32) -> Result<PageRequest, AppError> {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(1);

        u32::try_from(page)
            .ok()
            .and_then(|page| PageRequest::new(page, per_page))
            .ok_or_else(|| AppError::not_found("Page not found"))
    }
}

/// Listing body, or 404 for an empty page past the first.
pub(crate) fn page_view(page: Page<Post>) -> Result<PageView<Post>, AppError> {
    if page.is_out_of_range() {
        return Err(AppError::not_found("Page not found"));
    }
    Ok(page.into())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Router harness over the in-memory store.

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::auth::{cheap_hasher, CredentialHasher};
    use crate::config::{AppConfig, SecurityConfig};
    use crate::mail::Outbox;
    use crate::models::{Account, NewAccount};
    use crate::secret::{SecretPolicy, SigningSecret};
    use crate::store::{AccountStore, MemoryStore};
    use crate::{build_router, AppState};

    pub const PASSWORD: &str = "correct horse";

    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub outbox: Outbox,
        router: Router,
    }

    pub struct TestResponse {
        pub status: StatusCode,
        pub headers: axum::http::HeaderMap,
        pub body: Value,
    }

    impl TestApp {
        pub fn new() -> Self {
            let secret =
                SigningSecret::new("e789d02eeb0875c93c93995dc6aeef9f", &SecretPolicy::default())
                    .unwrap();
            let mut config = AppConfig::new(secret);
            config.public_base_url = "http://blog.test".to_string();
            config.security = SecurityConfig::builder()
                .disable_rate_limiting()
                .disable_tracing()
                .build();

            let store = Arc::new(MemoryStore::new());
            let outbox = Outbox::new();
            let state = AppState::new(
                config,
                store.clone(),
                store.clone(),
                Arc::new(cheap_hasher()),
                Arc::new(outbox.clone()),
            );
            let router = build_router(state.clone());

            Self {
                state,
                store,
                outbox,
                router,
            }
        }

        /// Insert an account whose password is [`PASSWORD`].
        pub async fn account(&self, username: &str, email: &str) -> Account {
            self.store
                .insert(NewAccount {
                    username: username.into(),
                    email: email.into(),
                    password_hash: cheap_hasher().hash(PASSWORD).unwrap(),
                })
                .await
                .unwrap()
        }

        pub fn token(&self, account: &Account) -> String {
            self.state
                .sessions
                .issue(account, false, Utc::now())
                .unwrap()
                .token
        }

        pub async fn send(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> TestResponse {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(json) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

            TestResponse {
                status,
                headers,
                body,
            }
        }

        pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
            self.send(Method::GET, uri, token, None).await
        }

        pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
            self.send(Method::POST, uri, token, Some(body)).await
        }

        pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
            self.send(Method::PUT, uri, token, Some(body)).await
        }
    }
}
