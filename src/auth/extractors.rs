use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{
    claims::Claims,
    jwt::{JwtKeys, TokenError},
};
use crate::error::AppError;

/// Verified claims of the caller. Rejects the request with 401 otherwise.
pub struct AuthUser(pub Claims);

/// Pulls the token out of `Authorization: Bearer <token>`; a bare token is accepted too.
pub(crate) fn token_from_header(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .unwrap_or(value)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Authentication("missing token".into()))?;

        let claims = keys.verify(token_from_header(header)).map_err(|e| {
            warn!(reason = %e, "token rejected");
            AppError::Authentication(
                match e {
                    TokenError::Expired => "token expired",
                    TokenError::InvalidSignature => "invalid token",
                    TokenError::Malformed => "malformed token",
                }
                .into(),
            )
        })?;

        Ok(AuthUser(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(token_from_header("Bearer abc.def.ghi"), "abc.def.ghi");
        assert_eq!(token_from_header("bearer abc.def.ghi"), "abc.def.ghi");
        assert_eq!(token_from_header("abc.def.ghi"), "abc.def.ghi");
        assert_eq!(token_from_header("  Bearer   abc  "), "abc");
    }
}
