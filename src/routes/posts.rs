//! Post creation and author-only edits.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use super::{message, MessageResponse};
use crate::auth::CurrentUser;
use crate::error::{AppError, Result};
use crate::models::{Account, NewPost, Post};
use crate::observability::SecurityEvent;
use crate::store::PostStore;
use crate::validation::{validate_length, validate_required, Validate, ValidatedJson, ValidationError};
use crate::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route(
            "/posts/{id}",
            get(show_post).put(update_post).delete(delete_post),
        )
}

#[derive(Debug, Deserialize)]
struct PostForm {
    title: String,
    content: String,
}

impl Validate for PostForm {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_required(&self.title, "title")?;
        validate_length(&self.title, 1, 1000, "title")?;
        validate_required(&self.content, "content")
    }
}

async fn find(state: &AppState, id: i64) -> Result<Post> {
    state
        .posts
        .find_post(id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))
}

/// Load a post the caller is about to modify.
async fn owned_post(state: &AppState, id: i64, user: &Account) -> Result<Post> {
    let post = find(state, id).await?;
    if post.author_id != user.id {
        crate::security_event!(
            SecurityEvent::AccessDenied,
            account_id = user.id,
            post_id = id,
            "Modification of another author's post refused"
        );
        return Err(AppError::forbidden("You are not the author of this post"));
    }
    Ok(post)
}

async fn create_post(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    ValidatedJson(form): ValidatedJson<PostForm>,
) -> Result<(StatusCode, Json<Post>)> {
    let post = state
        .posts
        .insert_post(NewPost {
            title: form.title,
            content: form.content,
            author_id: user.id,
            date_posted: Utc::now(),
        })
        .await?;

    tracing::info!(post_id = post.id, author_id = user.id, "Post created");
    Ok((StatusCode::CREATED, Json(post)))
}

async fn show_post(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Post>> {
    Ok(Json(find(&state, id).await?))
}

async fn update_post(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidatedJson(form): ValidatedJson<PostForm>,
) -> Result<Json<Post>> {
    owned_post(&state, id, &user).await?;
    let post = state.posts.update_post(id, &form.title, &form.content).await?;
    Ok(Json(post))
}

async fn delete_post(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>> {
    owned_post(&state, id, &user).await?;
    if !state.posts.delete_post(id).await? {
        return Err(AppError::not_found("Post not found"));
    }
    Ok(message("Your post has been deleted!"))
}
