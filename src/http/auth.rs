//! JWT bearer auth: `Authorization: Bearer <JWT>`, `sub` = user id.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Axum extractor for the authenticated user id (JWT `sub`). Any handler
/// that requires auth adds `user: AuthUser` to its parameter list.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<std::sync::Arc<AppState>> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Auth("missing bearer token".to_string()))?;

        let claims = verify(token, state.config.auth.secret_key.expose_secret())?;
        Ok(AuthUser(claims.sub))
    }
}

fn verify(token: &str, secret: &str) -> Result<Claims, Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| Error::Auth(format!("invalid token: {e}")))?;
    Ok(data.claims)
}

/// Reject a cross-user request: `path_user` is the `user` named in the
/// resource path/body, `auth_user` is the JWT's `sub`.
pub fn require_same_user(auth_user: &str, path_user: &str) -> Result<(), Error> {
    if auth_user != path_user {
        return Err(Error::Forbidden(format!(
                    "token subject {auth_user} may not act as {path_user}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(sub: &str, secret: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn verifies_valid_token() {
        let token = token_for("user-1", "shh");
        let claims = verify(&token, "shh").unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = token_for("user-1", "shh");
        assert!(verify(&token, "different").is_err());
    }

    #[test]
    fn same_user_check() {
        assert!(require_same_user("u1", "u1").is_ok());
        assert!(require_same_user("u1", "u2").is_err());
    }
}
