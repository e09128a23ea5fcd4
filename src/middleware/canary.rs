// src/middleware/canary.rs

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderValue, request::Parts},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;

pub const CANARY_HEADER: &str = "x-canary";

/// Routing tag of a canary deployment (a pull request number). Carried
/// through the request untouched; it never changes what the store does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canary(pub String);

impl Canary {
    /// Digits only, surrounding whitespace ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }
}

/// Reads `x-canary`, drops invalid values, and echoes a valid tag on the
/// response.
pub async fn canary_tag(mut req: Request, next: Next) -> Response {
    let canary = req
        .headers()
        .get(CANARY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(Canary::parse);

    if let Some(canary) = &canary {
        tracing::Span::current().record("canary", canary.0.as_str());
        req.extensions_mut().insert(canary.clone());
    }

    let mut response = next.run(req).await;

    if let Some(canary) = canary {
        if let Ok(value) = HeaderValue::from_str(&canary.0) {
            response.headers_mut().insert(CANARY_HEADER, value);
        }
    }
    response
}

/// The request's canary tag, if one was set.
#[derive(Debug, Clone, Default)]
pub struct CanaryContext(pub Option<Canary>);

impl<S> FromRequestParts<S> for CanaryContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Canary>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_digits_are_accepted() {
        assert_eq!(Canary::parse("1234"), Some(Canary("1234".into())));
        assert_eq!(Canary::parse(" 42 "), Some(Canary("42".into())));
        assert_eq!(Canary::parse(""), None);
        assert_eq!(Canary::parse("pr-12"), None);
        assert_eq!(Canary::parse("-5"), None);
        assert_eq!(Canary::parse("1.5"), None);
    }
}
