//! Public listing, about and liveness.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::{page_view, PageQuery};
use crate::error::Result;
use crate::models::Post;
use crate::pagination::PageView;
use crate::store::PostStore;
use crate::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/home", get(home))
        .route("/about", get(about))
        .route("/health", get(health))
}

/// All posts, newest first.
async fn home(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageView<Post>>> {
    let request = query.request(state.config.posts_per_page)?;
    let page = state.posts.recent_posts(request).await?;
    Ok(Json(page_view(page)?))
}

#[derive(Debug, Serialize)]
struct About {
    title: &'static str,
}

async fn about() -> Json<About> {
    Json(About { title: "About" })
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{TimeDelta, Utc};

    use crate::models::NewPost;
    use crate::routes::testing::TestApp;
    use crate::store::PostStore;

    async fn seed(app: &TestApp, count: i64) {
        let author = app.account("corey", "corey@blog.com").await;
        let start = Utc::now();
        for i in 0..count {
            app.state
                .posts
                .insert_post(NewPost {
                    title: format!("Post {i}"),
                    content: "content".into(),
                    author_id: author.id,
                    date_posted: start + TimeDelta::minutes(i),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_home_lists_newest_first() {
        let app = TestApp::new();
        seed(&app, 6).await;

        let response = app.get("/", None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["total"], 6);
        assert_eq!(response.body["pages"], 2);
        assert_eq!(response.body["items"].as_array().unwrap().len(), 5);
        assert_eq!(response.body["items"][0]["title"], "Post 5");
        assert_eq!(response.body["items"][0]["author"], "corey");

        let response = app.get("/home?page=2", None).await;
        assert_eq!(response.body["items"].as_array().unwrap().len(), 1);
        assert_eq!(response.body["items"][0]["title"], "Post 0");
        assert_eq!(response.body["prev_num"], 1);
    }

    #[tokio::test]
    async fn test_home_page_bounds() {
        let app = TestApp::new();

        // empty first page is fine
        let response = app.get("/", None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["total"], 0);

        seed(&app, 2).await;
        assert_eq!(app.get("/?page=abc", None).await.status, StatusCode::OK);
        assert_eq!(app.get("/?page=0", None).await.status, StatusCode::NOT_FOUND);
        assert_eq!(app.get("/?page=9", None).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_about_and_health() {
        let app = TestApp::new();
        assert_eq!(app.get("/about", None).await.body["title"], "About");

        let response = app.get("/health", None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["status"], "ok");
    }
}
