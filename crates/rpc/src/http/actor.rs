//! Caller identity from request headers

use std::str::FromStr;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use milkbank_core::{Actor, Role};

use super::response::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The acting user, taken from `X-Actor-Id` and `X-Actor-Role`
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| ApiError::unauthenticated("missing X-Actor-Id header"))?;
        let role = header(ACTOR_ROLE_HEADER)
            .ok_or_else(|| ApiError::unauthenticated("missing X-Actor-Role header"))?;
        let role = Role::from_str(role)
            .map_err(|_| ApiError::unauthenticated(format!("unknown role '{}'", role)))?;

        Ok(CurrentActor(Actor::new(id, role)))
    }
}
