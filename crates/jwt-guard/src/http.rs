//! Axum integration: guard extractor and authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::GuardError;
use crate::guard::AuthGuard;
use crate::registrar::GuardRegistrar;
use crate::request::RequestContext;
use crate::user::Authenticatable;

/// Router state handing out guards of one name.
pub struct GuardState<U: Authenticatable> {
    registrar: Arc<GuardRegistrar<U>>,
    guard: String,
}

impl<U: Authenticatable> Clone for GuardState<U> {
    fn clone(&self) -> Self {
        Self {
            registrar: Arc::clone(&self.registrar),
            guard: self.guard.clone(),
        }
    }
}

impl<U: Authenticatable> GuardState<U> {
    /// State for the registrar's default guard.
    pub fn new(registrar: Arc<GuardRegistrar<U>>) -> Self {
        let guard = registrar.default_guard_name().to_string();
        Self { registrar, guard }
    }

    /// State for a named guard.
    pub fn named(registrar: Arc<GuardRegistrar<U>>, guard: impl Into<String>) -> Self {
        Self {
            registrar,
            guard: guard.into(),
        }
    }

    pub fn guard_name(&self) -> &str {
        &self.guard
    }

    pub fn registrar(&self) -> &Arc<GuardRegistrar<U>> {
        &self.registrar
    }

    pub fn guard_for(&self, request: RequestContext) -> Result<AuthGuard<U>, GuardError> {
        self.registrar.guard(&self.guard, request)
    }
}

/// Hands each handler a fresh guard bound to its request.
impl<S, U> FromRequestParts<S> for AuthGuard<U>
where
    S: Send + Sync,
    U: Authenticatable,
    GuardState<U>: FromRef<S>,
{
    type Rejection = GuardError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        GuardState::<U>::from_ref(state).guard_for(RequestContext::from_parts(parts))
    }
}

/// The user resolved by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser<U>(pub U);

impl<U> CurrentUser<U> {
    pub fn into_inner(self) -> U {
        self.0
    }
}

impl<U> std::ops::Deref for CurrentUser<U> {
    type Target = U;

    fn deref(&self) -> &U {
        &self.0
    }
}

impl<S, U> FromRequestParts<S> for CurrentUser<U>
where
    S: Send + Sync,
    U: Authenticatable,
{
    type Rejection = GuardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser<U>>()
            .cloned()
            .ok_or(GuardError::Unauthenticated)
    }
}

/// Authentication middleware.
///
/// Resolves the caller through the state's guard and injects a
/// [`CurrentUser`] into request extensions. A request without a usable
/// identity is rejected before reaching the handler.
pub async fn require_auth<U: Authenticatable>(
    State(state): State<GuardState<U>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let mut guard = state.guard_for(RequestContext::from_request(&req))?;
    let user = guard.authenticate().await?.clone();

    debug!(user_id = %user.auth_identifier(), path = %req.uri().path(), "request authenticated");
    req.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardSettings;
    use crate::directory::{StaticDirectory, StaticUser};
    use crate::token::{JwtEngine, JwtSettings, TokenEngine};
    use crate::user::{Role, User};
    use axum::http::{Request, StatusCode};
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    const SECRET: &str = "http-test-secret-with-more-than-32-characters";

    fn state() -> (GuardState<User>, Arc<dyn TokenEngine>) {
        let engine: Arc<dyn TokenEngine> =
            Arc::new(JwtEngine::new(JwtSettings::new(SECRET)).unwrap());
        let mut registrar: GuardRegistrar<User> = GuardRegistrar::new("api");
        registrar
            .extend("jwt", GuardRegistrar::jwt_driver(Arc::clone(&engine)))
            .register_directory(
                "users",
                Arc::new(StaticDirectory::new([StaticUser {
                    id: "42".to_string(),
                    username: "dev".to_string(),
                    name: None,
                    email: "dev@localhost".to_string(),
                    password_hash: bcrypt::hash("devpassword123", 4).unwrap(),
                    role: Role::User,
                    active: true,
                }])),
            )
            .define_guard("api", GuardSettings::default());
        (GuardState::new(Arc::new(registrar)), engine)
    }

    async fn whoami(CurrentUser(user): CurrentUser<User>) -> String {
        user.username
    }

    fn app(state: GuardState<User>) -> Router {
        Router::new()
            .route("/me", get(whoami))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                require_auth::<User>,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_require_auth_accepts_valid_token() {
        let (state, engine) = state();
        let token = engine.issue("42").await.unwrap();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"dev");
    }

    #[tokio::test]
    async fn test_require_auth_missing_token() {
        let (state, _) = state();
        let response = app(state)
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_require_auth_rejects_garbage_token() {
        let (state, _) = state();
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/me?token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_auth_unknown_subject() {
        let (state, engine) = state();
        let token = engine.issue("404").await.unwrap();
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header("Cookie", format!("auth_token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_guard_extractor() {
        let (state, engine) = state();
        let token = engine.issue("42").await.unwrap();

        async fn check(mut guard: AuthGuard<User>) -> String {
            guard.check().await.unwrap().to_string()
        }

        let app = Router::new().route("/check", get(check)).with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/check?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"true");
    }
}
