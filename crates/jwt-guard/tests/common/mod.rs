//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use jwt_guard::api::{self, AppState};
use jwt_guard::config::GuardSettings;
use jwt_guard::directory::{NewUser, SqliteDirectory, StaticDirectory, StaticUser};
use jwt_guard::registrar::GuardRegistrar;
use jwt_guard::token::{JwtEngine, JwtSettings, TokenEngine};
use jwt_guard::user::{Role, User};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";
pub const ALICE_PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub router: Router,
    pub registrar: Arc<GuardRegistrar<User>>,
    pub engine: Arc<dyn TokenEngine>,
    pub alice: User,
}

fn make_static_user(id: &str, username: &str, password: &str, role: Role) -> StaticUser {
    StaticUser {
        id: id.to_string(),
        username: username.to_string(),
        name: None,
        email: format!("{username}@localhost"),
        password_hash: bcrypt::hash(password, 4).expect("Failed to hash password"),
        role,
        active: true,
    }
}

/// App with an `api` guard over an in-memory SQLite directory holding alice,
/// and a `staff` guard over a static directory holding dev.
pub async fn test_app() -> TestApp {
    let directory = SqliteDirectory::in_memory()
        .await
        .expect("in-memory database")
        .with_bcrypt_cost(4);
    let alice = directory
        .create_user(NewUser {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: ALICE_PASSWORD.to_string(),
            display_name: Some("Alice".to_string()),
            role: Role::User,
        })
        .await
        .expect("create alice");

    let engine: Arc<dyn TokenEngine> =
        Arc::new(JwtEngine::new(JwtSettings::new(JWT_SECRET)).expect("engine"));

    let mut registrar: GuardRegistrar<User> = GuardRegistrar::new("api");
    registrar
        .extend("jwt", GuardRegistrar::jwt_driver(Arc::clone(&engine)))
        .register_directory("users", Arc::new(directory))
        .register_directory(
            "staff",
            Arc::new(StaticDirectory::new([make_static_user(
                "dev",
                "dev",
                "devpassword123",
                Role::Admin,
            )])),
        )
        .define_guard("api", GuardSettings::default())
        .define_guard(
            "staff",
            GuardSettings {
                provider: "staff".to_string(),
                ..GuardSettings::default()
            },
        );
    let registrar = Arc::new(registrar);

    let state = AppState::new(Arc::clone(&registrar)).with_secure_cookies(false);

    TestApp {
        router: api::router(state),
        registrar,
        engine,
        alice,
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn set_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn login(app: &Router, username: &str, password: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri("/auth/login")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "username": username,
                        "password": password,
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Log alice in and return her token.
pub async fn alice_token(app: &Router) -> String {
    let response = login(app, "alice", ALICE_PASSWORD).await;
    let json = body_json(response).await;
    json["token"].as_str().expect("token in login response").to_string()
}

pub async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}
