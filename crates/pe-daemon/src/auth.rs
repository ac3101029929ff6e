// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP basic authentication.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pe_error::{EngineError, ErrorCode};
use pe_platform::Credentials;

use crate::ApiError;

/// Credentials taken from an `Authorization: Basic` header.
///
/// They are not checked here; the platform accepts or rejects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials(pub Credentials);

fn unauthenticated(message: &str) -> EngineError {
    EngineError::new(ErrorCode::Unauthenticated, message)
}

/// Parse the value of an `Authorization` header.
pub fn parse_basic(header: &str) -> Result<Credentials, EngineError> {
    let (scheme, token) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(unauthenticated("Unsupported authorization scheme"));
    }
    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|_| unauthenticated("Malformed basic credentials"))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| unauthenticated("Malformed basic credentials"))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| unauthenticated("Malformed basic credentials"))?;
    if user.is_empty() {
        return Err(unauthenticated("Malformed basic credentials"));
    }
    Ok(Credentials::new(user, pass))
}

impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| unauthenticated("Authentication required"))?
            .to_str()
            .map_err(|_| unauthenticated("Malformed authorization header"))?;
        Ok(Self(parse_basic(header)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_and_password() {
        let c = parse_basic("Basic YWxpY2U6c2VjcmV0").unwrap();
        assert_eq!(c, Credentials::new("alice", "secret"));
    }

    #[test]
    fn password_may_contain_colons() {
        let token = STANDARD.encode("alice:a:b");
        let c = parse_basic(&format!("basic {token}")).unwrap();
        assert_eq!(c.password, "a:b");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = parse_basic("Bearer abc").unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthenticated);
        assert_eq!(err.message, "Unsupported authorization scheme");
    }

    #[test]
    fn rejects_garbage() {
        for header in ["Basic", "Basic !!!", "Basic YWxpY2U="] {
            let err = parse_basic(header).unwrap_err();
            assert_eq!(err.http_status(), 401, "{header}");
        }
    }
}
