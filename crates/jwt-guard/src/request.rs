//! Owned snapshot of the parts of a request the guard looks at.

use axum::http::{HeaderMap, Request, Uri, header::COOKIE, request::Parts};

/// The inbound request as the guard sees it.
///
/// Only headers and URI are kept; the body never matters for token lookup.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HeaderMap,
    uri: Uri,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, uri: Uri) -> Self {
        Self { headers, uri }
    }

    /// A context with no headers and `/` as URI. Used for offline operations
    /// such as issuing a token from the CLI.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.headers.clone(), parts.uri.clone())
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self::new(req.headers().clone(), req.uri().clone())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// First value of a header, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|h| h.to_str().ok())
    }

    /// URL-decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.uri.query().and_then(|q| {
            q.split('&').find_map(|pair| {
                let mut parts = pair.splitn(2, '=');
                let key = parts.next()?;
                let value = parts.next()?;
                if key == name {
                    urlencoding::decode(value).ok().map(|s| s.into_owned())
                } else {
                    None
                }
            })
        })
    }

    /// Value of a cookie from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find_map(|cookie_header| cookie_value(cookie_header, name))
    }
}

fn cookie_value<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}
