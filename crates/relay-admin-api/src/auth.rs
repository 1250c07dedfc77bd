//! JWT bearer-token extraction, delegating verification to
//! `relay_common::auth` so both this collaborator and the core agree on one
//! identity format.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_common::auth::IdentityContext;
use serde_json::json;

#[derive(Clone)]
pub struct AuthIdentity(pub IdentityContext);

impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
    crate::state::AppState: axum::extract::FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = <crate::state::AppState as axum::extract::FromRef<S>>::from_ref(state);

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthRejection::Missing)?;

        let token = header_value.strip_prefix("Bearer ").ok_or(AuthRejection::Malformed)?;

        let identity = relay_common::auth::verify_jwt(token, &app_state.jwt_secret)
            .map_err(|_| AuthRejection::Invalid)?;

        Ok(AuthIdentity(identity))
    }
}

#[derive(Debug)]
pub enum AuthRejection {
    Missing,
    Malformed,
    Invalid,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let message = match self {
            AuthRejection::Missing => "missing authorization header",
            AuthRejection::Malformed => "authorization header must be a bearer token",
            AuthRejection::Invalid => "invalid or expired token",
        };
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
    }
}
