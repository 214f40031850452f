//! Authentication handlers.

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::state::AppState;
use crate::error::GuardError;
use crate::guard::{Attempt, AuthGuard};
use crate::http::CurrentUser;
use crate::user::{Credentials, User};

/// Token response for login and refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    /// Seconds until the token expires.
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: bool,
}

/// `?all=true` revokes every token of the subject.
#[derive(Debug, Default, Deserialize)]
pub struct RevokeQuery {
    #[serde(default)]
    pub all: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Exchange credentials for a token (body and `auth_token` cookie).
#[instrument(skip_all, fields(username = %credentials.username))]
pub async fn login(
    State(state): State<AppState>,
    mut guard: AuthGuard<User>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, GuardError> {
    let token = match guard.attempt(&credentials, true).await? {
        Attempt::LoggedIn(token) => token,
        _ => return Err(GuardError::InvalidCredentials),
    };

    let expires_in = guard.claims().await?.expires_in(Utc::now().timestamp());
    let user = guard.cached_user().cloned();
    let cookie = state.auth_cookie(token.as_str(), expires_in);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(TokenResponse {
            token: token.into_inner(),
            token_type: "bearer",
            expires_in,
            user,
        }),
    ))
}

/// Check credentials without issuing anything.
pub async fn validate(
    mut guard: AuthGuard<User>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<ValidateResponse>, GuardError> {
    let valid = guard.validate(&credentials).await?;
    Ok(Json(ValidateResponse { valid }))
}

/// Current user profile.
pub async fn me(CurrentUser(user): CurrentUser<User>) -> Json<User> {
    Json(user)
}

/// Swap the request's token for a fresh one.
pub async fn refresh(
    State(state): State<AppState>,
    mut guard: AuthGuard<User>,
) -> Result<impl IntoResponse, GuardError> {
    let token = guard.refresh().await?;
    let expires_in = guard.claims().await?.expires_in(Utc::now().timestamp());
    let cookie = state.auth_cookie(token.as_str(), expires_in);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(TokenResponse {
            token: token.into_inner(),
            token_type: "bearer",
            expires_in,
            user: None,
        }),
    ))
}

/// Revoke the request's token and clear the auth cookie.
pub async fn logout(
    State(state): State<AppState>,
    Query(query): Query<RevokeQuery>,
    mut guard: AuthGuard<User>,
) -> Result<impl IntoResponse, GuardError> {
    guard.logout(query.all).await?;

    Ok((
        AppendHeaders([(SET_COOKIE, state.clear_cookie())]),
        StatusCode::NO_CONTENT,
    ))
}

/// Revoke the request's token, keeping the cookie.
pub async fn invalidate(
    Query(query): Query<RevokeQuery>,
    mut guard: AuthGuard<User>,
) -> Result<Json<InvalidateResponse>, GuardError> {
    let invalidated = guard.invalidate(query.all).await?;
    info!(force_all = query.all, invalidated, "token invalidated");
    Ok(Json(InvalidateResponse { invalidated }))
}
