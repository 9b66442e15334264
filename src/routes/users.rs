//! Registration, login, account management and password reset.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{message, page_view, MessageResponse, PageQuery};
use crate::auth::{
    bearer_token, Anonymous, CredentialHasher, CurrentUser, HashError, LoginOutcome,
    LoginRejection, ResetVerification,
};
use crate::error::{AppError, ErrorKind, Result};
use crate::mail::{reset_link, reset_message, MailSender};
use crate::models::{Account, NewAccount, Post};
use crate::observability::SecurityEvent;
use crate::pagination::PageView;
use crate::store::{AccountStore, PostStore, StoreError};
use crate::validation::{
    validate_email, validate_length, validate_matches, validate_required, Validate,
    ValidatedJson, ValidationError,
};
use crate::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/account", get(show_account).put(update_account))
        .route("/user/{username}", get(user_posts))
        .route("/reset-request", post(reset_request))
        .route("/reset-password/{token}", get(check_reset_token).post(reset_password))
}

const INVALID_RESET_TOKEN: &str = "That is an invalid or an expired token";

// ============================================================================
// Request bodies
// ============================================================================

fn validate_username(username: &str) -> std::result::Result<(), ValidationError> {
    validate_required(username, "username")?;
    validate_length(username, 2, 50, "username")
}

/// Matches the `users.email` column width.
const MAX_EMAIL_LEN: usize = 120;

fn validate_email_field(email: &str) -> std::result::Result<(), ValidationError> {
    validate_required(email, "email")?;
    validate_length(email, 1, MAX_EMAIL_LEN, "email")?;
    validate_email(email)
}

fn validate_password_pair(
    password: &str,
    confirm_password: &str,
) -> std::result::Result<(), ValidationError> {
    validate_required(password, "password")?;
    validate_required(confirm_password, "confirm_password")?;
    validate_matches(confirm_password, password, "confirm_password", "password")
}

#[derive(Debug, Deserialize)]
struct RegisterForm {
    username: String,
    email: String,
    password: String,
    confirm_password: String,
}

impl Validate for RegisterForm {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_username(&self.username)?;
        validate_email_field(&self.email)?;
        validate_password_pair(&self.password, &self.confirm_password)
    }
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: String,
    password: String,
    #[serde(default)]
    remember: bool,
}

impl Validate for LoginForm {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_email_field(&self.email)?;
        validate_required(&self.password, "password")
    }
}

#[derive(Debug, Deserialize)]
struct UpdateAccountForm {
    username: String,
    email: String,
}

impl Validate for UpdateAccountForm {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_username(&self.username)?;
        validate_email_field(&self.email)
    }
}

#[derive(Debug, Deserialize)]
struct ResetRequestForm {
    email: String,
}

impl Validate for ResetRequestForm {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_email_field(&self.email)
    }
}

#[derive(Debug, Deserialize)]
struct ResetPasswordForm {
    password: String,
    confirm_password: String,
}

impl Validate for ResetPasswordForm {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_password_pair(&self.password, &self.confirm_password)
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
struct AccountResponse {
    message: String,
    account: Account,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    expires_at: DateTime<Utc>,
    account: Account,
}

/// Public face of an author.
#[derive(Debug, Serialize)]
struct Profile {
    username: String,
    image_file: String,
}

#[derive(Debug, Serialize)]
struct UserPostsResponse {
    user: Profile,
    posts: PageView<Post>,
}

#[derive(Debug, Serialize)]
struct TokenCheck {
    valid: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn hash_password(hasher: Arc<dyn CredentialHasher>, password: String) -> Result<String> {
    let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| HashError::Task(e.to_string()))??;
    Ok(hash)
}

/// Reject a username or email another account already holds.
async fn ensure_unique(
    state: &AppState,
    username: &str,
    email: &str,
    current: Option<&Account>,
) -> Result<()> {
    if current.map_or(true, |a| a.username != username)
        && state.accounts.find_by_username(username).await?.is_some()
    {
        return Err(StoreError::Conflict { field: "username" }.into());
    }
    if current.map_or(true, |a| a.email != email)
        && state.accounts.find_by_email(email).await?.is_some()
    {
        return Err(StoreError::Conflict { field: "email" }.into());
    }
    Ok(())
}

async fn register(
    _: Anonymous,
    State(state): State<AppState>,
    ValidatedJson(form): ValidatedJson<RegisterForm>,
) -> Result<(StatusCode, Json<AccountResponse>)> {
    ensure_unique(&state, &form.username, &form.email, None).await?;

    let password_hash = hash_password(Arc::clone(&state.hasher), form.password).await?;
    let account = state
        .accounts
        .insert(NewAccount {
            username: form.username,
            email: form.email,
            password_hash,
        })
        .await?;

    crate::security_event!(
        SecurityEvent::UserRegistered,
        account_id = account.id,
        username = %account.username,
        "Account registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            message: format!("Account created for {}!", account.username),
            account,
        }),
    ))
}

async fn login(
    _: Anonymous,
    State(state): State<AppState>,
    ValidatedJson(form): ValidatedJson<LoginForm>,
) -> Result<Json<LoginResponse>> {
    let now = Utc::now();

    match state.guard.attempt_login(&form.email, &form.password, now).await? {
        LoginOutcome::Accepted(account) => {
            let session = state.sessions.issue(&account, form.remember, now)?;
            Ok(Json(LoginResponse {
                token: session.token,
                expires_at: session.expires_at,
                account,
            }))
        }
        LoginOutcome::Rejected(LoginRejection::NoSuchAccount) => Err(AppError::unauthorized(
            "Login Unsuccessful. Please check email and password",
        )),
        LoginOutcome::Rejected(LoginRejection::BadCredentials { attempts_remaining }) => {
            Err(AppError::unauthorized(format!(
                "Incorrect credentials: Total {attempts_remaining} login attempts allowed"
            )))
        }
        LoginOutcome::Rejected(LoginRejection::AccountLocked { until }) => {
            let retry_after = (until - now).num_seconds().max(1).unsigned_abs();
            Err(AppError::locked("Account is locked", retry_after))
        }
    }
}

/// Sessions are stateless; the client discards its token.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Json<MessageResponse> {
    if let Some(claims) = bearer_token(&headers).and_then(|t| state.sessions.validate(t, Utc::now())) {
        crate::security_event!(
            SecurityEvent::Logout,
            account_id = %claims.sub,
            "User logged out"
        );
    }
    message("Logged out")
}

async fn show_account(CurrentUser(account): CurrentUser) -> Json<Account> {
    Json(account)
}

async fn update_account(
    CurrentUser(current): CurrentUser,
    State(state): State<AppState>,
    ValidatedJson(form): ValidatedJson<UpdateAccountForm>,
) -> Result<Json<AccountResponse>> {
    // the guard writes this record too
    let _guard = state.locks.lock(current.id).await;
    let mut account = state
        .accounts
        .find_by_id(current.id)
        .await?
        .ok_or_else(|| AppError::not_found("Account not found"))?;

    ensure_unique(&state, &form.username, &form.email, Some(&account)).await?;

    account.username = form.username;
    account.email = form.email;
    state.accounts.save(&account).await?;

    crate::security_event!(
        SecurityEvent::UserModified,
        account_id = account.id,
        "Account details updated"
    );

    Ok(Json(AccountResponse {
        message: "Your account has been updated".to_string(),
        account,
    }))
}

async fn user_posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<UserPostsResponse>> {
    let user = state
        .accounts
        .find_by_username(&username)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let request = query.request(state.config.posts_per_page)?;
    let page = state.posts.posts_by_author(user.id, request).await?;

    Ok(Json(UserPostsResponse {
        user: Profile {
            username: user.username,
            image_file: user.image_file,
        },
        posts: page_view(page)?,
    }))
}

/// Issue a reset token for `account` and mail the link to it.
async fn send_reset_email(state: &AppState, account: &Account) -> Result<()> {
    let token = state.resets.issue(account, Utc::now())?;
    let link = reset_link(&state.config.public_base_url, &token);
    state
        .mailer
        .send(reset_message(account, &state.config.mail_sender, &link))
        .await?;

    info!(account_id = account.id, "Password reset email sent");
    Ok(())
}

async fn reset_request(
    _: Anonymous,
    State(state): State<AppState>,
    ValidatedJson(form): ValidatedJson<ResetRequestForm>,
) -> Result<Json<MessageResponse>> {
    let account = state
        .accounts
        .find_by_email(&form.email)
        .await?
        .ok_or_else(|| {
            AppError::new(
                ErrorKind::Validation,
                "No account with that email.Please create an account first!",
            )
            .with_field("email")
        })?;

    send_reset_email(&state, &account).await?;
    Ok(message(
        "An email has been sent with instructions to reset password!",
    ))
}

async fn check_reset_token(
    _: Anonymous,
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<TokenCheck>> {
    let valid = matches!(
        state.resets.verify(&token, Utc::now()).await?,
        ResetVerification::Valid(_)
    );
    Ok(Json(TokenCheck { valid }))
}

async fn reset_password(
    _: Anonymous,
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidatedJson(form): ValidatedJson<ResetPasswordForm>,
) -> Result<Json<MessageResponse>> {
    let ResetVerification::Valid(account) = state.resets.verify(&token, Utc::now()).await? else {
        return Err(AppError::bad_request(INVALID_RESET_TOKEN));
    };

    state.resets.complete_reset(account.id, &form.password).await?;
    Ok(message("Your Password has been updated!"))
}

#[cfg(test)]
mod tests {
    use axum::http::{header, StatusCode};
    use chrono::{TimeDelta, Utc};
    use serde_json::json;

    use crate::routes::testing::{TestApp, PASSWORD};
    use crate::store::AccountStore;

    fn registration(username: &str, email: &str) -> serde_json::Value {
        json!({
            "username": username,
            "email": email,
            "password": "s3cret-pass",
            "confirm_password": "s3cret-pass",
        })
    }

    fn credentials(email: &str, password: &str) -> serde_json::Value {
        json!({ "email": email, "password": password })
    }

    #[tokio::test]
    async fn test_register_creates_account() {
        let app = TestApp::new();
        let response = app.post("/register", None, registration("corey", "corey@blog.com")).await;

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body["account"]["username"], "corey");
        assert_eq!(response.body["account"]["image_file"], "default.jpg");
        assert!(response.body["account"].get("password_hash").is_none());

        let stored = app.store.find_by_email("corey@blog.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "s3cret-pass");
        assert_eq!(stored.failed_attempt_count, 0);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let app = TestApp::new();
        app.account("corey", "corey@blog.com").await;

        let response = app.post("/register", None, registration("corey", "new@blog.com")).await;
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert_eq!(response.body["message"], "That username is taken");
        assert_eq!(response.body["field"], "username");

        let response = app.post("/register", None, registration("other", "corey@blog.com")).await;
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert_eq!(response.body["message"], "Please enter a unique Email Id");
    }

    #[tokio::test]
    async fn test_register_validates_form() {
        let app = TestApp::new();

        let mut body = registration("corey", "corey@blog.com");
        body["confirm_password"] = json!("different");
        let response = app.post("/register", None, body).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body["field"], "confirm_password");

        let response = app.post("/register", None, registration("c", "corey@blog.com")).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body["field"], "username");

        let response = app.post("/register", None, registration("corey", "not-an-email")).await;
        assert_eq!(response.body["field"], "email");
    }

    #[tokio::test]
    async fn test_email_longer_than_column_rejected() {
        let app = TestApp::new();
        let long_email = format!("{}@{}.com", "a".repeat(64), "b".repeat(80));
        assert!(long_email.len() > 120);

        let response = app.post("/register", None, registration("corey", &long_email)).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body["field"], "email");

        let account = app.account("corey", "corey@blog.com").await;
        let token = app.token(&account);
        let response = app
            .put("/account", Some(&token), json!({"username": "corey", "email": long_email}))
            .await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body["field"], "email");
        assert_eq!(app.get("/account", Some(&token)).await.body["email"], "corey@blog.com");
    }

    #[tokio::test]
    async fn test_logged_in_caller_cannot_register() {
        let app = TestApp::new();
        let account = app.account("corey", "corey@blog.com").await;
        let token = app.token(&account);

        let response = app
            .post("/register", Some(&token), registration("other", "other@blog.com"))
            .await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_login_issues_usable_session() {
        let app = TestApp::new();
        app.account("corey", "corey@blog.com").await;

        let response = app.post("/login", None, credentials("corey@blog.com", PASSWORD)).await;
        assert_eq!(response.status, StatusCode::OK);
        let token = response.body["token"].as_str().unwrap().to_string();

        let response = app.get("/account", Some(&token)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["username"], "corey");
    }

    #[tokio::test]
    async fn test_login_failures_report_remaining_attempts() {
        let app = TestApp::new();
        app.account("corey", "corey@blog.com").await;

        let response = app.post("/login", None, credentials("corey@blog.com", "wrong")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.body["message"],
            "Incorrect credentials: Total 5 login attempts allowed"
        );

        let response = app.post("/login", None, credentials("nobody@blog.com", "wrong")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_lockout_after_repeated_failures() {
        let app = TestApp::new();
        app.account("corey", "corey@blog.com").await;

        for _ in 0..6 {
            let response = app.post("/login", None, credentials("corey@blog.com", "wrong")).await;
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        }

        let response = app.post("/login", None, credentials("corey@blog.com", "wrong")).await;
        assert_eq!(response.status, StatusCode::LOCKED);
        assert!(response.headers.contains_key(header::RETRY_AFTER));

        // correct password is refused during the lock
        let response = app.post("/login", None, credentials("corey@blog.com", PASSWORD)).await;
        assert_eq!(response.status, StatusCode::LOCKED);
        assert_eq!(response.body["message"], "Account is locked");
    }

    #[tokio::test]
    async fn test_login_after_lock_expiry() {
        let app = TestApp::new();
        let mut account = app.account("corey", "corey@blog.com").await;
        account.failed_attempt_count = 6;
        account.locked_until = Some(Utc::now() - TimeDelta::seconds(1));
        app.store.save(&account).await.unwrap();

        let response = app.post("/login", None, credentials("corey@blog.com", PASSWORD)).await;
        assert_eq!(response.status, StatusCode::OK);

        let stored = app.store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempt_count, 0);
    }

    #[tokio::test]
    async fn test_account_requires_session() {
        let app = TestApp::new();

        let response = app.get("/account", None).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["message"], "Please log in to access this page.");

        let response = app.get("/account", Some("garbage")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["message"], "Invalid or expired session");
    }

    #[tokio::test]
    async fn test_update_account() {
        let app = TestApp::new();
        let account = app.account("corey", "corey@blog.com").await;
        app.account("taken", "taken@blog.com").await;
        let token = app.token(&account);

        // unchanged values are not conflicts
        let response = app
            .put("/account", Some(&token), json!({"username": "corey", "email": "corey@blog.com"}))
            .await;
        assert_eq!(response.status, StatusCode::OK);

        let response = app
            .put("/account", Some(&token), json!({"username": "taken", "email": "corey@blog.com"}))
            .await;
        assert_eq!(response.status, StatusCode::CONFLICT);

        let response = app
            .put("/account", Some(&token), json!({"username": "cms", "email": "cms@blog.com"}))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["message"], "Your account has been updated");

        let stored = app.store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.username, "cms");
        assert_eq!(stored.email, "cms@blog.com");
        assert_eq!(stored.password_hash, account.password_hash);
    }

    #[tokio::test]
    async fn test_logout_acknowledges() {
        let app = TestApp::new();
        let account = app.account("corey", "corey@blog.com").await;
        let token = app.token(&account);

        let response = app.send(axum::http::Method::POST, "/logout", Some(&token), None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["message"], "Logged out");
    }

    #[tokio::test]
    async fn test_user_posts_unknown_user() {
        let app = TestApp::new();
        let response = app.get("/user/nobody", None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_user_posts_profile() {
        let app = TestApp::new();
        app.account("corey", "corey@blog.com").await;

        let response = app.get("/user/corey", None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["user"]["username"], "corey");
        assert!(response.body["user"].get("email").is_none());
        assert_eq!(response.body["posts"]["total"], 0);
    }

    fn mailed_token(app: &TestApp) -> String {
        let mail = app.outbox.last().unwrap();
        let link = mail
            .body
            .lines()
            .find(|line| line.starts_with("http://blog.test/reset-password/"))
            .unwrap();
        link.trim_start_matches("http://blog.test/reset-password/").to_string()
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let app = TestApp::new();
        let account = app.account("corey", "corey@blog.com").await;

        let response = app
            .post("/reset-request", None, json!({"email": "corey@blog.com"}))
            .await;
        assert_eq!(response.status, StatusCode::OK);

        let mail = app.outbox.last().unwrap();
        assert_eq!(mail.subject, "Password Reset Request");
        assert_eq!(mail.recipients, vec!["corey@blog.com".to_string()]);
        let token = mailed_token(&app);

        let response = app.get(&format!("/reset-password/{token}"), None).await;
        assert_eq!(response.body["valid"], true);

        let response = app
            .post(
                &format!("/reset-password/{token}"),
                None,
                json!({"password": "brand new", "confirm_password": "brand new"}),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["message"], "Your Password has been updated!");

        let response = app.post("/login", None, credentials("corey@blog.com", PASSWORD)).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let response = app.post("/login", None, credentials("corey@blog.com", "brand new")).await;
        assert_eq!(response.status, StatusCode::OK);

        let stored = app.store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.username, "corey");
    }

    #[tokio::test]
    async fn test_reset_request_unknown_email() {
        let app = TestApp::new();
        let response = app
            .post("/reset-request", None, json!({"email": "nobody@blog.com"}))
            .await;

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.body["message"],
            "No account with that email.Please create an account first!"
        );
        assert!(app.outbox.messages().is_empty());
    }

    #[tokio::test]
    async fn test_reset_with_invalid_token() {
        let app = TestApp::new();
        app.account("corey", "corey@blog.com").await;

        let response = app.get("/reset-password/not.a.token", None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["valid"], false);

        let response = app
            .post(
                "/reset-password/not.a.token",
                None,
                json!({"password": "brand new", "confirm_password": "brand new"}),
            )
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["message"], "That is an invalid or an expired token");
    }

    #[tokio::test]
    async fn test_reset_keeps_lockout_state() {
        let app = TestApp::new();
        let mut account = app.account("corey", "corey@blog.com").await;
        let until = Utc::now() + TimeDelta::minutes(10);
        account.failed_attempt_count = 6;
        account.locked_until = Some(until);
        app.store.save(&account).await.unwrap();

        app.post("/reset-request", None, json!({"email": "corey@blog.com"}))
            .await;
        let token = mailed_token(&app);
        let response = app
            .post(
                &format!("/reset-password/{token}"),
                None,
                json!({"password": "brand new", "confirm_password": "brand new"}),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK);

        let stored = app.store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempt_count, 6);
        assert_eq!(stored.locked_until, Some(until));
    }
}
