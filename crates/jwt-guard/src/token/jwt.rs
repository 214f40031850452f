//! HMAC-signed JWT engine with an in-process revocation list.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Claims, Token, TokenEngine, TokenParser};
use crate::error::{GuardError, VerificationFailure};
use crate::request::RequestContext;

/// Engine settings, already resolved from configuration.
#[derive(Debug, Clone)]
pub struct JwtSettings {
    /// Shared HMAC secret.
    pub secret: String,
    pub algorithm: Algorithm,
    /// Issuer written into and required from every token.
    pub issuer: Option<String>,
    /// Token lifetime in seconds.
    pub ttl_secs: i64,
    /// How long after `iat` a token may still be refreshed, in seconds.
    pub refresh_ttl_secs: i64,
    /// Clock skew tolerance for `exp`/`nbf`, in seconds.
    pub leeway_secs: u64,
    pub parser: TokenParser,
}

impl JwtSettings {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            issuer: Some("jwt-guard".to_string()),
            ttl_secs: 3600,
            refresh_ttl_secs: 60 * 60 * 24 * 14,
            leeway_secs: 0,
            parser: TokenParser::default(),
        }
    }
}

pub(crate) fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// JWT engine.
///
/// Revocation state lives in two maps: single tokens keyed by `jti`, and
/// per-subject cut-offs (unix millis) for "revoke everything issued so far".
/// The `jti` is a UUIDv7, so its embedded timestamp orders a token against a
/// cut-off with millisecond precision.
pub struct JwtEngine {
    settings: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    revoked_tokens: DashMap<String, i64>,
    revoked_subjects: DashMap<String, i64>,
}

impl JwtEngine {
    pub fn new(settings: JwtSettings) -> Result<Self, GuardError> {
        if settings.secret.is_empty() {
            return Err(GuardError::Config("no JWT secret configured".to_string()));
        }
        if !is_hmac(settings.algorithm) {
            return Err(GuardError::Config(format!(
                "unsupported JWT algorithm {:?}; only HS256/HS384/HS512 are available",
                settings.algorithm
            )));
        }
        if settings.ttl_secs <= 0 || settings.refresh_ttl_secs < 0 {
            return Err(GuardError::Config(
                "ttl_secs must be positive and refresh_ttl_secs not negative".to_string(),
            ));
        }

        let encoding_key = EncodingKey::from_secret(settings.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());

        Ok(Self {
            settings,
            encoding_key,
            decoding_key,
            revoked_tokens: DashMap::new(),
            revoked_subjects: DashMap::new(),
        })
    }

    pub fn settings(&self) -> &JwtSettings {
        &self.settings
    }

    /// Token lifetime in seconds.
    pub fn ttl_secs(&self) -> i64 {
        self.settings.ttl_secs
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn claims_for(&self, subject: &str, now: i64) -> Claims {
        Claims {
            sub: subject.to_string(),
            iss: self.settings.issuer.clone(),
            exp: now + self.settings.ttl_secs,
            iat: now,
            nbf: Some(now),
            jti: Uuid::now_v7().to_string(),
        }
    }

    pub(crate) fn encode_claims(&self, claims: &Claims) -> Result<Token, GuardError> {
        encode(
            &Header::new(self.settings.algorithm),
            claims,
            &self.encoding_key,
        )
        .map(Token::from)
        .map_err(|e| GuardError::Engine(e.to_string()))
    }

    fn decode(&self, token: &Token, validate_exp: bool) -> Result<Claims, VerificationFailure> {
        let mut validation = Validation::new(self.settings.algorithm);
        validation.validate_exp = validate_exp;
        validation.validate_nbf = true;
        validation.leeway = self.settings.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(ref issuer) = self.settings.issuer {
            validation.set_issuer(&[issuer]);
        }

        decode::<Claims>(token.as_str(), &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!("JWT validation failed: {:?}", e.kind());
                match e.kind() {
                    ErrorKind::ExpiredSignature => VerificationFailure::Expired,
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_) => VerificationFailure::Malformed,
                    _ => VerificationFailure::Invalid,
                }
            })
    }

    /// Issue time in unix millis, from the `jti` when it carries one.
    fn issued_at_millis(claims: &Claims) -> i64 {
        Uuid::parse_str(&claims.jti)
            .ok()
            .and_then(|id| id.get_timestamp())
            .map(|ts| {
                let (secs, nanos) = ts.to_unix();
                secs as i64 * 1000 + i64::from(nanos / 1_000_000)
            })
            .unwrap_or(claims.iat * 1000)
    }

    fn is_revoked(&self, claims: &Claims) -> bool {
        if self.revoked_tokens.contains_key(&claims.jti) {
            return true;
        }
        self.revoked_subjects
            .get(&claims.sub)
            .is_some_and(|cutoff| Self::issued_at_millis(claims) <= *cutoff)
    }

    fn revoke(&self, claims: &Claims, force_all: bool) {
        let now = Self::now();
        self.prune(now);

        self.revoked_tokens.insert(claims.jti.clone(), claims.exp);
        if force_all {
            self.revoked_subjects
                .insert(claims.sub.clone(), Utc::now().timestamp_millis());
            info!(subject = %claims.sub, "revoked all tokens for subject");
        } else {
            info!(subject = %claims.sub, jti = %claims.jti, "revoked token");
        }
    }

    /// Drop revocation entries for tokens that can no longer verify or refresh.
    fn prune(&self, now: i64) {
        let refresh_ttl = self.settings.refresh_ttl_secs;
        let leeway = i64::try_from(self.settings.leeway_secs).unwrap_or(i64::MAX);
        let grace = refresh_ttl.max(leeway);
        let horizon = self.settings.ttl_secs.saturating_add(leeway).max(refresh_ttl);

        // A revoked token still verifies until exp + leeway and stays
        // refreshable until iat + refresh_ttl, with iat < exp.
        self.revoked_tokens.retain(|_, exp| exp.saturating_add(grace) >= now);
        self.revoked_subjects.retain(|_, revoked_at_ms| {
            (*revoked_at_ms / 1000).saturating_add(horizon) >= now
        });
    }

    /// Number of revocation entries currently held.
    pub fn revocation_count(&self) -> usize {
        self.revoked_tokens.len() + self.revoked_subjects.len()
    }
}

#[async_trait]
impl TokenEngine for JwtEngine {
    fn parse_from_request(&self, request: &RequestContext) -> Option<Token> {
        self.settings.parser.parse(request)
    }

    async fn verify(&self, token: &Token) -> Result<Claims, GuardError> {
        let claims = self.decode(token, true)?;
        if self.is_revoked(&claims) {
            debug!(subject = %claims.sub, "rejecting revoked token");
            return Err(VerificationFailure::Revoked.into());
        }
        Ok(claims)
    }

    async fn issue(&self, subject: &str) -> Result<Token, GuardError> {
        let claims = self.claims_for(subject, Self::now());
        let token = self.encode_claims(&claims)?;
        debug!(subject = %subject, jti = %claims.jti, "issued token");
        Ok(token)
    }

    async fn refresh(&self, token: &Token) -> Result<Token, GuardError> {
        let claims = self.decode(token, false)?;
        if self.is_revoked(&claims) {
            return Err(VerificationFailure::Revoked.into());
        }

        let now = Self::now();
        if now > claims.iat + self.settings.refresh_ttl_secs {
            return Err(VerificationFailure::Expired.into());
        }

        // Claim the jti before minting: one token yields at most one successor.
        self.prune(now);
        match self.revoked_tokens.entry(claims.jti.clone()) {
            Entry::Occupied(_) => return Err(VerificationFailure::Revoked.into()),
            Entry::Vacant(slot) => {
                slot.insert(claims.exp);
            }
        }

        let fresh = self.issue(&claims.sub).await.inspect_err(|_| {
            self.revoked_tokens.remove(&claims.jti);
        })?;
        info!(subject = %claims.sub, jti = %claims.jti, "refreshed token");
        Ok(fresh)
    }

    async fn invalidate(&self, token: &Token, force_all: bool) -> Result<bool, GuardError> {
        // Expired tokens may still be invalidated; they could be refreshed.
        let claims = self.decode(token, false)?;
        self.revoke(&claims, force_all);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    const SECRET: &str = "test-secret-for-unit-tests-minimum-32-chars-long";

    fn engine() -> JwtEngine {
        JwtEngine::new(JwtSettings::new(SECRET)).unwrap()
    }

    fn expired_token(engine: &JwtEngine, subject: &str, age: i64) -> Token {
        let now = Utc::now().timestamp();
        let mut claims = engine.claims_for(subject, now - age);
        claims.exp = now - 10;
        engine.encode_claims(&claims).unwrap()
    }

    fn failure(result: Result<Claims, GuardError>) -> VerificationFailure {
        match result {
            Err(GuardError::Token(failure)) => failure,
            other => panic!("expected verification failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_issue_verify_round_trip() {
        let engine = engine();
        for subject in ["42", "usr_abc123", "alice@example.com", "ünïcødé"] {
            let token = engine.issue(subject).await.unwrap();
            let claims = engine.verify(&token).await.unwrap();
            assert_eq!(claims.sub, subject);
            assert_eq!(claims.iss.as_deref(), Some("jwt-guard"));
            assert_eq!(claims.exp - claims.iat, 3600);
        }
    }

    #[tokio::test]
    async fn test_issued_tokens_are_unique() {
        let engine = engine();
        let a = engine.issue("42").await.unwrap();
        let b = engine.issue("42").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_verify_garbage_is_malformed() {
        let engine = engine();
        let result = engine.verify(&Token::from("not-a-jwt")).await;
        assert_eq!(failure(result), VerificationFailure::Malformed);
    }

    #[tokio::test]
    async fn test_verify_foreign_signature_is_invalid() {
        let other = JwtEngine::new(JwtSettings::new(
            "another-secret-that-is-also-at-least-32-chars",
        ))
        .unwrap();
        let token = other.issue("42").await.unwrap();

        let result = engine().verify(&token).await;
        assert_eq!(failure(result), VerificationFailure::Invalid);
    }

    #[tokio::test]
    async fn test_verify_wrong_issuer_is_invalid() {
        let mut settings = JwtSettings::new(SECRET);
        settings.issuer = Some("someone-else".to_string());
        let other = JwtEngine::new(settings).unwrap();
        let token = other.issue("42").await.unwrap();

        let result = engine().verify(&token).await;
        assert_eq!(failure(result), VerificationFailure::Invalid);
    }

    #[tokio::test]
    async fn test_verify_expired() {
        let engine = engine();
        let token = expired_token(&engine, "42", 7200);
        let result = engine.verify(&token).await;
        assert_eq!(failure(result), VerificationFailure::Expired);
    }

    #[tokio::test]
    async fn test_invalidate_single_token() {
        let engine = engine();
        let first = engine.issue("42").await.unwrap();
        let second = engine.issue("42").await.unwrap();

        assert!(engine.invalidate(&first, false).await.unwrap());

        let result = engine.verify(&first).await;
        assert_eq!(failure(result), VerificationFailure::Revoked);
        assert_eq!(engine.verify(&second).await.unwrap().sub, "42");
    }

    #[tokio::test]
    async fn test_invalidate_force_all_revokes_subject() {
        let engine = engine();
        let first = engine.issue("42").await.unwrap();
        let second = engine.issue("42").await.unwrap();
        let unrelated = engine.issue("7").await.unwrap();

        engine.invalidate(&first, true).await.unwrap();

        assert_eq!(
            failure(engine.verify(&first).await),
            VerificationFailure::Revoked
        );
        assert_eq!(
            failure(engine.verify(&second).await),
            VerificationFailure::Revoked
        );
        assert!(engine.verify(&unrelated).await.is_ok());
    }

    #[tokio::test]
    async fn test_tokens_issued_after_force_all_are_valid() {
        let engine = engine();
        let old = engine.issue("42").await.unwrap();
        engine.invalidate(&old, true).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let fresh = engine.issue("42").await.unwrap();
        assert_eq!(engine.verify(&fresh).await.unwrap().sub, "42");
    }

    #[tokio::test]
    async fn test_invalidate_rejects_garbage() {
        let engine = engine();
        let result = engine.invalidate(&Token::from("garbage"), false).await;
        assert!(matches!(
            result,
            Err(GuardError::Token(VerificationFailure::Malformed))
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_revokes() {
        let engine = engine();
        let old = engine.issue("42").await.unwrap();

        let fresh = engine.refresh(&old).await.unwrap();
        assert_ne!(fresh, old);
        assert_eq!(engine.verify(&fresh).await.unwrap().sub, "42");
        assert_eq!(
            failure(engine.verify(&old).await),
            VerificationFailure::Revoked
        );
    }

    #[tokio::test]
    async fn test_refresh_revoked_token_fails() {
        let engine = engine();
        let old = engine.issue("42").await.unwrap();
        engine.refresh(&old).await.unwrap();

        let result = engine.refresh(&old).await;
        assert!(matches!(
            result,
            Err(GuardError::Token(VerificationFailure::Revoked))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_yields_one_successor() {
        let engine = engine();
        let old = engine.issue("42").await.unwrap();

        let (a, b) = tokio::join!(engine.refresh(&old), engine.refresh(&old));
        let fresh: Vec<Token> = [a, b].into_iter().filter_map(Result::ok).collect();
        assert_eq!(fresh.len(), 1);
        assert_eq!(engine.verify(&fresh[0]).await.unwrap().sub, "42");
    }

    #[tokio::test]
    async fn test_refresh_expired_within_window() {
        let engine = engine();
        let token = expired_token(&engine, "42", 7200);
        let fresh = engine.refresh(&token).await.unwrap();
        assert_eq!(engine.verify(&fresh).await.unwrap().sub, "42");
    }

    #[tokio::test]
    async fn test_refresh_outside_window_is_expired() {
        let mut settings = JwtSettings::new(SECRET);
        settings.refresh_ttl_secs = 3600;
        let engine = JwtEngine::new(settings).unwrap();
        let token = expired_token(&engine, "42", 7200);

        let result = engine.refresh(&token).await;
        assert!(matches!(
            result,
            Err(GuardError::Token(VerificationFailure::Expired))
        ));
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let mut settings = JwtSettings::new(SECRET);
        settings.algorithm = Algorithm::RS256;
        assert!(matches!(
            JwtEngine::new(settings),
            Err(GuardError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_negative_refresh_ttl() {
        let mut settings = JwtSettings::new(SECRET);
        settings.refresh_ttl_secs = -1;
        assert!(matches!(
            JwtEngine::new(settings),
            Err(GuardError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_empty_secret() {
        assert!(matches!(
            JwtEngine::new(JwtSettings::new("")),
            Err(GuardError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_hs512_round_trip() {
        let mut settings = JwtSettings::new(SECRET);
        settings.algorithm = Algorithm::HS512;
        let engine = JwtEngine::new(settings).unwrap();
        let token = engine.issue("42").await.unwrap();
        assert_eq!(engine.verify(&token).await.unwrap().sub, "42");
    }

    #[tokio::test]
    async fn test_prune_drops_stale_entries() {
        let mut settings = JwtSettings::new(SECRET);
        settings.refresh_ttl_secs = 5;
        let engine = JwtEngine::new(settings).unwrap();

        let stale = expired_token(&engine, "old", 600);
        engine.invalidate(&stale, false).await.unwrap();
        assert_eq!(engine.revocation_count(), 1);

        // The next revocation prunes the stale entry.
        let live = engine.issue("42").await.unwrap();
        engine.invalidate(&live, false).await.unwrap();
        assert_eq!(engine.revocation_count(), 1);
    }

    #[tokio::test]
    async fn test_prune_keeps_tokens_within_leeway() {
        let mut settings = JwtSettings::new(SECRET);
        settings.refresh_ttl_secs = 0;
        settings.leeway_secs = 60;
        let engine = JwtEngine::new(settings).unwrap();

        // Ten seconds past exp, still accepted thanks to the leeway.
        let revoked = expired_token(&engine, "42", 600);
        assert!(engine.verify(&revoked).await.is_ok());
        engine.invalidate(&revoked, false).await.unwrap();

        let other = engine.issue("7").await.unwrap();
        engine.invalidate(&other, false).await.unwrap();

        assert_eq!(engine.revocation_count(), 2);
        assert_eq!(
            failure(engine.verify(&revoked).await),
            VerificationFailure::Revoked
        );
    }

    #[test]
    fn test_parse_from_request_uses_parser() {
        let engine = engine();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        let request = RequestContext::new(headers, "/".parse().unwrap());
        assert_eq!(
            engine.parse_from_request(&request),
            Some(Token::from("abc"))
        );
        assert!(
            engine
                .parse_from_request(&RequestContext::empty())
                .is_none()
        );
    }
}
