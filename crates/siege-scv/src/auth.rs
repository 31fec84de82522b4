//! Request authentication extractors.
//!
//! Three kinds of caller reach an SCV: cores (bearer token bound to an
//! active stream), managers (token resolved through the catalog) and the
//! command center (shared SCV password).

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use siege_auth::{bearer_token, credential, secrets_match};
use siege_catalog::{Manager, ShardCatalog};
use siege_core::BearerToken;

use crate::error::ScvError;
use crate::state::ScvState;

fn authorization(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// A well-formed core bearer token. Whether it is bound to a stream is
/// checked by the core protocol itself.
#[derive(Debug, Clone)]
pub struct CoreToken(pub BearerToken);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CoreToken {
    type Rejection = ScvError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(bearer_token(authorization(parts))?))
    }
}

/// An authenticated manager.
#[derive(Debug, Clone)]
pub struct ManagerAuth(pub Manager);

#[async_trait]
impl<C: ShardCatalog + 'static> FromRequestParts<ScvState<C>> for ManagerAuth {
    type Rejection = ScvError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ScvState<C>,
    ) -> Result<Self, Self::Rejection> {
        let token = credential(authorization(parts))?;
        let manager = state
            .service
            .catalog()
            .manager_by_token(token)
            .await?
            .ok_or_else(|| ScvError::AuthBad("unknown manager token".to_string()))?;
        Ok(Self(manager))
    }
}

/// The command center, identified by this SCV's shared password.
#[derive(Debug, Clone, Copy)]
pub struct CommandCenter;

#[async_trait]
impl<C: ShardCatalog + 'static> FromRequestParts<ScvState<C>> for CommandCenter {
    type Rejection = ScvError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ScvState<C>,
    ) -> Result<Self, Self::Rejection> {
        let given = credential(authorization(parts))?;
        let expected = &state.service.config().password;
        if expected.is_empty() || !secrets_match(given, expected) {
            return Err(ScvError::AuthBad("bad scv password".to_string()));
        }
        Ok(Self)
    }
}
