//! Credential verification and administrative account creation.
//!
//! The failure envelope is deliberately generic: unknown username and wrong
//! password produce byte-identical responses so callers cannot enumerate
//! accounts. A storage outage is the one outcome allowed to look different
//! (5xx), so clients can tell "try again" from "access denied".

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gate_store::{Account, NewAccount, StoreError};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRequest {
    pub username: String,
    pub password: String,
}

/// Sanitized projection of an account. Never carries the password.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountProfile {
    pub username: String,
    pub rank: i64,
    pub email: String,
}

impl From<Account> for AccountProfile {
    fn from(account: Account) -> Self {
        AccountProfile {
            username: account.username,
            rank: account.rank,
            email: account.email,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<AccountProfile>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
    pub rank: i64,
    pub email: String,
}

/// Outcome of one username/password lookup, wording left to the endpoint.
enum Verdict {
    Match(Box<Account>),
    NoMatch,
    StoreDown,
}

async fn check_credentials(state: &AppState, req: &VerifyRequest) -> Verdict {
    match state.store().find_by_username_async(&req.username).await {
        Ok(Some(account)) if account.password == req.password => Verdict::Match(Box::new(account)),
        Ok(_) => Verdict::NoMatch,
        Err(err) => {
            error!(target: "gate::verify", error = %err, "credential lookup failed");
            Verdict::StoreDown
        }
    }
}

fn verdict_response(verdict: Verdict, found_msg: &str, invalid_msg: &str) -> Response {
    match verdict {
        Verdict::Match(account) => Json(VerifyResponse {
            success: true,
            message: found_msg.to_string(),
            data: Some(AccountProfile::from(*account)),
        })
        .into_response(),
        Verdict::NoMatch => Json(VerifyResponse {
            success: false,
            message: invalid_msg.to_string(),
            data: None,
        })
        .into_response(),
        Verdict::StoreDown => crate::responses::store_unavailable(),
    }
}

/// Authentication query; also mounted at `/verify`.
#[utoipa::path(
    post,
    path = "/search_user",
    tag = "Auth",
    operation_id = "search_user_doc",
    description = "Resolve a username/password pair to an account.",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerifyResponse),
        (status = 500, description = "Credential store unavailable", body = VerifyResponse)
    )
)]
pub async fn search_user(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> Response {
    let verdict = check_credentials(&state, &req).await;
    verdict_response(verdict, "User found", "Invalid credentials")
}

/// Login alias kept from the fronting API; same lookup, different copy.
#[utoipa::path(
    post,
    path = "/login",
    tag = "Auth",
    operation_id = "login_doc",
    description = "Authenticate a username/password pair.",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Login outcome", body = VerifyResponse),
        (status = 500, description = "Credential store unavailable", body = VerifyResponse)
    )
)]
pub async fn login(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> Response {
    let verdict = check_credentials(&state, &req).await;
    verdict_response(verdict, "Login successful", "Invalid username or password")
}

/// Profile-retrieval alias from the fronting API; same lookup, the failure
/// copy stays generic across unknown-user and wrong-password.
#[utoipa::path(
    post,
    path = "/user/info",
    tag = "Auth",
    operation_id = "user_info_doc",
    description = "Fetch the profile behind a username/password pair.",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Lookup outcome", body = VerifyResponse),
        (status = 500, description = "Credential store unavailable", body = VerifyResponse)
    )
)]
pub async fn user_info(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> Response {
    let verdict = check_credentials(&state, &req).await;
    verdict_response(verdict, "User information retrieved", "User not found")
}

/// Administrative account creation, token-guarded.
#[utoipa::path(
    post,
    path = "/admin/accounts",
    tag = "Admin",
    operation_id = "create_account_doc",
    description = "Create an account (admin token required).",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created", body = VerifyResponse),
        (status = 400, description = "Invalid account fields"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Username already exists", body = VerifyResponse),
        (status = 500, description = "Credential store unavailable", body = VerifyResponse)
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAccountRequest>,
) -> Response {
    if !crate::admin_ok(&state, &headers) {
        return crate::responses::unauthorized();
    }
    if req.username.is_empty() || req.password.is_empty() || req.email.is_empty() || req.rank <= 0
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse {
                success: false,
                message: "username, password and email must be non-empty and rank positive".into(),
                data: None,
            }),
        )
            .into_response();
    }
    let account = NewAccount {
        username: req.username,
        password: req.password,
        rank: req.rank,
        email: req.email,
    };
    match state.store().insert_async(&account).await {
        Ok(_) => (
            StatusCode::CREATED,
            Json(VerifyResponse {
                success: true,
                message: "Account created".into(),
                data: Some(AccountProfile {
                    username: account.username,
                    rank: account.rank,
                    email: account.email,
                }),
            }),
        )
            .into_response(),
        Err(err @ StoreError::DuplicateUsername(_)) => (
            StatusCode::CONFLICT,
            Json(VerifyResponse {
                success: false,
                message: err.to_string(),
                data: None,
            }),
        )
            .into_response(),
        Err(err) => {
            error!(target: "gate::admin", error = %err, "account insert failed");
            crate::responses::store_unavailable()
        }
    }
}
