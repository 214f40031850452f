//! Per-request authentication guard.
//!
//! A guard is built for one request, resolves the caller at most once, and is
//! dropped with the request. Token mechanics are delegated to a
//! [`TokenEngine`], user lookups to a [`UserDirectory`].

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::directory::UserDirectory;
use crate::error::GuardError;
use crate::request::RequestContext;
use crate::token::{Claims, Token, TokenEngine};
use crate::user::{Authenticatable, Credentials};

/// Shared user directory handle.
pub type DynDirectory<U> = Arc<dyn UserDirectory<User = U>>;

/// Outcome of a credential attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// No such user, or the credentials did not validate.
    Rejected,
    /// Credentials are valid; nothing was logged in.
    Validated,
    /// Credentials are valid; the user is now the current identity.
    LoggedIn(Token),
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        !matches!(self, Attempt::Rejected)
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            Attempt::LoggedIn(token) => Some(token),
            _ => None,
        }
    }

    pub fn into_token(self) -> Option<Token> {
        match self {
            Attempt::LoggedIn(token) => Some(token),
            _ => None,
        }
    }
}

/// Cached identity decision.
#[derive(Debug, Clone)]
enum Resolution<U> {
    Unresolved,
    Authenticated(U),
    Unauthenticated,
}

impl<U> Resolution<U> {
    fn user(&self) -> Option<&U> {
        match self {
            Resolution::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum TokenSlot {
    /// Not looked up in the bound request yet.
    Unparsed,
    /// Looked up in the bound request (or cleared by logout).
    Parsed(Option<Token>),
    /// Set by the caller or minted by this guard; never replaced by parsing.
    Explicit(Token),
}

impl TokenSlot {
    fn get(&self) -> Option<&Token> {
        match self {
            TokenSlot::Unparsed => None,
            TokenSlot::Parsed(token) => token.as_ref(),
            TokenSlot::Explicit(token) => Some(token),
        }
    }
}

/// Stateless bearer-token guard.
pub struct AuthGuard<U: Authenticatable> {
    engine: Arc<dyn TokenEngine>,
    directory: DynDirectory<U>,
    request: RequestContext,
    token: TokenSlot,
    resolution: Resolution<U>,
    claims: Option<Claims>,
    last_attempted: Option<U>,
    token_required: bool,
}

impl<U: Authenticatable> AuthGuard<U> {
    /// Create a guard bound to a request. A missing token is an error by
    /// default; see [`AuthGuard::token_required`].
    pub fn new(
        engine: Arc<dyn TokenEngine>,
        directory: DynDirectory<U>,
        request: RequestContext,
    ) -> Self {
        Self {
            engine,
            directory,
            request,
            token: TokenSlot::Unparsed,
            resolution: Resolution::Unresolved,
            claims: None,
            last_attempted: None,
            token_required: true,
        }
    }

    /// Whether a request without a token is `MissingToken` (true) or just
    /// unauthenticated (false).
    pub fn token_required(mut self, required: bool) -> Self {
        self.token_required = required;
        self
    }

    // ------------------------------------------------------------------
    // Identity resolution
    // ------------------------------------------------------------------

    /// The authenticated user for this request.
    ///
    /// Resolved on first call and cached, including a negative result: later
    /// calls never touch the engine or directory again.
    pub async fn user(&mut self) -> Result<Option<&U>, GuardError> {
        if matches!(self.resolution, Resolution::Unresolved) {
            self.resolution = self.resolve().await?;
        }
        Ok(self.resolution.user())
    }

    async fn resolve(&mut self) -> Result<Resolution<U>, GuardError> {
        let token = if self.token_required {
            self.require_token()?
        } else {
            match self.token() {
                Some(token) => token.clone(),
                None => return Ok(Resolution::Unauthenticated),
            }
        };

        let claims = match self.engine.verify(&token).await {
            Ok(claims) => claims,
            Err(GuardError::Token(failure)) => {
                debug!(%failure, "token rejected; request is unauthenticated");
                return Ok(Resolution::Unauthenticated);
            }
            Err(e) => return Err(e),
        };

        let user = self.directory.resolve_by_id(&claims.sub).await?;
        self.claims = Some(claims);

        Ok(match user {
            Some(user) => Resolution::Authenticated(user),
            None => {
                debug!("token subject has no matching user");
                Resolution::Unauthenticated
            }
        })
    }

    /// Like [`AuthGuard::user`], but absence is `Unauthenticated`.
    pub async fn authenticate(&mut self) -> Result<&U, GuardError> {
        self.user().await?.ok_or(GuardError::Unauthenticated)
    }

    pub async fn check(&mut self) -> Result<bool, GuardError> {
        Ok(self.user().await?.is_some())
    }

    pub async fn guest(&mut self) -> Result<bool, GuardError> {
        Ok(!self.check().await?)
    }

    /// Identifier of the authenticated user.
    pub async fn id(&mut self) -> Result<Option<String>, GuardError> {
        Ok(self.user().await?.map(Authenticatable::auth_identifier))
    }

    /// Whether an identity is cached, without resolving.
    pub fn has_user(&self) -> bool {
        self.resolution.user().is_some()
    }

    /// The cached identity, without resolving.
    pub fn cached_user(&self) -> Option<&U> {
        self.resolution.user()
    }

    /// Make `user` the current identity.
    pub fn set_user(&mut self, user: U) {
        self.resolution = Resolution::Authenticated(user);
    }

    /// Drop the cached decision; the next [`AuthGuard::user`] resolves again.
    pub fn forget_user(&mut self) -> &mut Self {
        self.resolution = Resolution::Unresolved;
        self.claims = None;
        self
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Check credentials and, with `login`, make the user current and issue a
    /// token for them.
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn attempt(
        &mut self,
        credentials: &Credentials,
        login: bool,
    ) -> Result<Attempt, GuardError> {
        let user = self.directory.resolve_by_credentials(credentials).await?;
        self.last_attempted = user.clone();

        let Some(user) = user else {
            debug!("no user for credentials");
            return Ok(Attempt::Rejected);
        };

        if !self
            .directory
            .validate_credentials(&user, credentials)
            .await?
        {
            debug!("credentials did not validate");
            return Ok(Attempt::Rejected);
        }

        if !login {
            return Ok(Attempt::Validated);
        }

        let token = self.engine.issue(&user.auth_identifier()).await?;
        info!(user_id = %user.auth_identifier(), "user logged in");
        self.set_user(user);
        self.token = TokenSlot::Explicit(token.clone());
        self.claims = None;

        Ok(Attempt::LoggedIn(token))
    }

    /// Validate credentials without touching the guard's identity.
    pub async fn validate(&mut self, credentials: &Credentials) -> Result<bool, GuardError> {
        Ok(self.attempt(credentials, false).await?.is_success())
    }

    /// Validate credentials and make the user current for this request only.
    /// No token is issued.
    pub async fn once(&mut self, credentials: &Credentials) -> Result<bool, GuardError> {
        if !self.validate(credentials).await? {
            return Ok(false);
        }
        if let Some(user) = self.last_attempted.clone() {
            self.set_user(user);
        }
        Ok(true)
    }

    /// The user looked up by the most recent credential attempt.
    pub fn last_attempted(&self) -> Option<&U> {
        self.last_attempted.as_ref()
    }

    // ------------------------------------------------------------------
    // Direct identity operations
    // ------------------------------------------------------------------

    /// Make the user with `id` current for this request. No token is issued.
    pub async fn login_by_id(&mut self, id: &str) -> Result<bool, GuardError> {
        match self.directory.resolve_by_id(id).await? {
            Some(user) => {
                self.set_user(user);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Issue a token for the user with `id` without changing this guard's
    /// identity.
    pub async fn issue_token_for_id(&self, id: &str) -> Result<Option<Token>, GuardError> {
        match self.directory.resolve_by_id(id).await? {
            Some(user) => Ok(Some(self.engine.issue(&user.auth_identifier()).await?)),
            None => Ok(None),
        }
    }

    /// Forget the identity and revoke the current token (every token of the
    /// subject with `force_all`).
    ///
    /// The identity is cleared even when there is no token to revoke; that
    /// case still reports `MissingToken`.
    pub async fn logout(&mut self, force_all: bool) -> Result<(), GuardError> {
        let user_id = self.cached_user().map(Authenticatable::auth_identifier);
        self.resolution = Resolution::Unauthenticated;
        self.claims = None;

        let revoked = self.invalidate(force_all).await;
        self.token = TokenSlot::Parsed(None);
        revoked?;

        info!(user_id = user_id.as_deref().unwrap_or("-"), force_all, "user logged out");
        Ok(())
    }

    /// Swap the current token for a fresh one. The new token becomes current.
    pub async fn refresh(&mut self) -> Result<Token, GuardError> {
        let token = self.require_token()?;
        let fresh = self.engine.refresh(&token).await?;
        self.token = TokenSlot::Explicit(fresh.clone());
        self.claims = None;
        Ok(fresh)
    }

    /// Revoke the current token.
    pub async fn invalidate(&mut self, force_all: bool) -> Result<bool, GuardError> {
        let token = self.require_token()?;
        self.engine.invalidate(&token, force_all).await
    }

    // ------------------------------------------------------------------
    // Token and collaborators
    // ------------------------------------------------------------------

    /// The current token: the explicit one if set, else the one parsed from
    /// the bound request (looked up once).
    pub fn token(&mut self) -> Option<&Token> {
        if matches!(self.token, TokenSlot::Unparsed) {
            let parsed = self.engine.parse_from_request(&self.request);
            self.token = TokenSlot::Parsed(parsed);
        }
        self.token.get()
    }

    fn require_token(&mut self) -> Result<Token, GuardError> {
        self.token().cloned().ok_or(GuardError::MissingToken)
    }

    /// Use `token` for every following engine operation.
    ///
    /// A cached negative decision is dropped so the new token gets checked;
    /// an authenticated identity is kept.
    pub fn set_token(&mut self, token: impl Into<Token>) -> &mut Self {
        self.token = TokenSlot::Explicit(token.into());
        self.claims = None;
        if matches!(self.resolution, Resolution::Unauthenticated) {
            self.resolution = Resolution::Unresolved;
        }
        self
    }

    /// Verified claims of the current token.
    pub async fn claims(&mut self) -> Result<Claims, GuardError> {
        if let Some(ref claims) = self.claims {
            return Ok(claims.clone());
        }
        let token = self.require_token()?;
        let claims = self.engine.verify(&token).await?;
        self.claims = Some(claims.clone());
        Ok(claims)
    }

    /// Rebind to another request. A token parsed from the previous request
    /// is dropped; an explicit one is kept.
    pub fn set_request(&mut self, request: RequestContext) -> &mut Self {
        self.request = request;
        if matches!(self.token, TokenSlot::Parsed(_)) {
            self.token = TokenSlot::Unparsed;
            self.claims = None;
        }
        self
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn provider(&self) -> &DynDirectory<U> {
        &self.directory
    }

    pub fn set_provider(&mut self, directory: DynDirectory<U>) {
        self.directory = directory;
    }

    pub fn engine(&self) -> &Arc<dyn TokenEngine> {
        &self.engine
    }
}
