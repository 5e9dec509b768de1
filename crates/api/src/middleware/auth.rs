//! # 鉴权中间件
//!
//! 基于 JWT 的身份验证；验证通过后把 principal id 注入 request extensions，
//! 下游 handler 通过 `CurrentPrincipal` 提取器读取。

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::Claims;
use barstream_core::common::Principal;

/// 提取并验证 `Authorization: Bearer <token>`。
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req.headers().get(axum::http::header::AUTHORIZATION);

    let token = match auth_header {
        Some(header_val) => {
            let s = header_val
                .to_str()
                .map_err(|_| ApiError::Unauthorized("invalid auth header".into()))?;
            if !s.starts_with("Bearer ") {
                return Err(ApiError::Unauthorized("invalid bearer format".into()));
            }
            s[7..].to_string()
        }
        None => {
            return Err(ApiError::Unauthorized("missing authorization header".into()));
        }
    };

    let claims = verify_token(&state.jwt_secret, &token)?;
    req.extensions_mut().insert(Principal::new(claims.sub.clone()));
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Verifies a raw JWT string and returns its claims. Shared by the header
/// based middleware above and the SSE route, which receives the token as a
/// query parameter because `EventSource` cannot set custom headers.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.set_required_spec_claims(&["exp", "sub"]);

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_ref()), &validation)
        .map(|data| data.claims)
        .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))
}

/// Convenience extractor for the principal injected by `auth_middleware`.
pub struct CurrentPrincipal(pub Principal);

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("missing principal context".into()))?;
        Ok(CurrentPrincipal(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    fn token_for(sub: &str, secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn verify_token_round_trips_subject() {
        let token = token_for("alice", "s3cret", 3600);
        let claims = verify_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn verify_token_rejects_wrong_secret() {
        let token = token_for("alice", "s3cret", 3600);
        assert!(verify_token("wrong", &token).is_err());
    }

    #[test]
    fn verify_token_rejects_expired() {
        let token = token_for("alice", "s3cret", -10);
        assert!(verify_token("s3cret", &token).is_err());
    }
}
