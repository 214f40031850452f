//! Application state shared across handlers.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::http::GuardState;
use crate::registrar::GuardRegistrar;
use crate::user::User;

#[derive(Clone)]
pub struct AppState {
    pub guards: GuardState<User>,
    /// Name of the cookie carrying the token.
    pub cookie_name: String,
    /// Add `Secure` to auth cookies. Off for plain-http development.
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(registrar: Arc<GuardRegistrar<User>>) -> Self {
        Self {
            guards: GuardState::new(registrar),
            cookie_name: "auth_token".to_string(),
            secure_cookies: true,
        }
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub(crate) fn auth_cookie(&self, token: &str, max_age: i64) -> String {
        let secure_flag = if self.secure_cookies { " Secure;" } else { "" };
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax;{} Max-Age={}",
            self.cookie_name, token, secure_flag, max_age
        )
    }

    pub(crate) fn clear_cookie(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.cookie_name
        )
    }
}

impl FromRef<AppState> for GuardState<User> {
    fn from_ref(state: &AppState) -> Self {
        state.guards.clone()
    }
}
