//! Stateless bearer-token authentication guard.
//!
//! An [`AuthGuard`] is built per request. It finds a token in the request,
//! verifies it through a [`TokenEngine`], resolves the subject through a
//! [`UserDirectory`] and caches the outcome for the rest of the request.
//! Guards are handed out by a [`GuardRegistrar`], directly or through the
//! axum extractor in [`http`].

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod guard;
pub mod http;
pub mod registrar;
pub mod request;
pub mod token;
pub mod user;

pub use directory::UserDirectory;
pub use error::{GuardError, VerificationFailure};
pub use guard::{Attempt, AuthGuard};
pub use registrar::GuardRegistrar;
pub use request::RequestContext;
pub use token::{Claims, Token, TokenEngine};
pub use user::{Authenticatable, Credentials, User};
