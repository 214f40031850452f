//! Token lookup in inbound requests.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::Token;
use crate::request::RequestContext;

/// Where a token may be carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// `Authorization: Bearer <token>`.
    Header,
    /// A query parameter (browsers can't set headers on WebSocket upgrades).
    Query,
    /// A cookie (EventSource/WebSocket clients).
    Cookie,
}

impl TokenSource {
    pub fn default_order() -> Vec<TokenSource> {
        vec![TokenSource::Header, TokenSource::Cookie, TokenSource::Query]
    }
}

/// Tries each configured source in order and returns the first token found.
#[derive(Debug, Clone)]
pub struct TokenParser {
    sources: Vec<TokenSource>,
    query_param: String,
    cookie_name: String,
}

impl Default for TokenParser {
    fn default() -> Self {
        Self {
            sources: TokenSource::default_order(),
            query_param: "token".to_string(),
            cookie_name: "auth_token".to_string(),
        }
    }
}

impl TokenParser {
    pub fn new(
        sources: Vec<TokenSource>,
        query_param: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            sources,
            query_param: query_param.into(),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn sources(&self) -> &[TokenSource] {
        &self.sources
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Find a token in the request.
    ///
    /// A source holding something unusable (wrong scheme, empty value) counts
    /// as absent and the next source is tried.
    pub fn parse(&self, request: &RequestContext) -> Option<Token> {
        self.sources.iter().find_map(|source| {
            let found = match source {
                TokenSource::Header => request
                    .header("authorization")
                    .and_then(bearer_token_from_header)
                    .map(str::to_string),
                TokenSource::Query => request
                    .query_param(&self.query_param)
                    .filter(|v| !v.is_empty()),
                TokenSource::Cookie => request
                    .cookie(&self.cookie_name)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            };
            match &found {
                Some(_) => debug!("token found in {:?}", source),
                None => trace!("no token in {:?}", source),
            }
            found.map(Token::from)
        })
    }
}

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Option<&str> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next()?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        debug!("ignoring authorization header with scheme {scheme}");
        return None;
    }

    let token = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    Some(token)
}
