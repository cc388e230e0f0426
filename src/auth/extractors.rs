use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tower_cookies::Cookies;
use tracing::warn;

use super::{cookies::ACCESS_COOKIE, jwt::JwtKeys};
use crate::{error::AppError, state::AppState, users::repo_types::PublicUser};

/// Authenticated caller, resolved from an access token in the `accessToken`
/// cookie or an `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

fn bearer(parts: &Parts) -> Option<String> {
    let value = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_cookie = match Cookies::from_request_parts(parts, state).await {
            Ok(cookies) => cookies.get(ACCESS_COOKIE).map(|c| c.value().to_string()),
            Err(_) => None,
        };
        let token = from_cookie
            .filter(|t| !t.is_empty())
            .or_else(|| bearer(parts))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

        let claims = JwtKeys::from_ref(state).verify_access(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired access token");
            AppError::unauthorized("Invalid access token")
        })?;

        let user = state
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthorized("Invalid access token"))?;

        Ok(CurrentUser(user.into()))
    }
}
