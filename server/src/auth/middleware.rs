//! Authentication middleware.
//!
//! Bearer token extraction. When `AUTH_SECRET` is configured the token must
//! match it; otherwise requests without a token are accepted as anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or `anonymous`
    pub token: String,
}

impl AuthUser {
    pub fn is_anonymous(&self) -> bool {
        self.token == "anonymous"
    }
}

/// Compare without short-circuiting on the first differing byte.
fn token_matches(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check an `Authorization` header value against the configured secret.
pub fn authorize(
    header: Option<&str>,
    secret: Option<&str>,
) -> Result<AuthUser, (StatusCode, &'static str)> {
    match header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = header.trim_start_matches("Bearer ").to_string();

            if token.is_empty() {
                return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
            }

            if let Some(secret) = secret {
                if !token_matches(&token, secret) {
                    return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
                }
            }

            Ok(AuthUser { token })
        }
        Some(_) => Err((
            StatusCode::UNAUTHORIZED,
            "Invalid authorization header format",
        )),
        None => match secret {
            // No auth configured, allow anonymous access
            None => Ok(AuthUser {
                token: "anonymous".to_string(),
            }),
            Some(_) => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        },
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(auth_header, state.config.auth_secret.as_deref())
    }
}
