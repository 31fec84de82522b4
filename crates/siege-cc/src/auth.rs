//! Request authentication extractors.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use siege_auth::{credential, secrets_match};
use siege_catalog::{Catalog, Manager};
use siege_core::Role;

use crate::error::ApiError;
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// Header cores may use for their engine key instead of `Authorization`.
pub const ENGINE_KEY_HEADER: &str = "engine-key";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// An authenticated manager of any role.
#[derive(Debug, Clone)]
pub struct ManagerAuth(pub Manager);

#[async_trait]
impl<C, S> FromRequestParts<CcState<C, S>> for ManagerAuth
where
    C: Catalog + 'static,
    S: ScvClient + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &CcState<C, S>,
    ) -> Result<Self, Self::Rejection> {
        let token = credential(header(parts, AUTHORIZATION.as_str()))?;
        Ok(Self(state.cc.manager_by_token(token).await?))
    }
}

/// An authenticated manager with the admin role.
#[derive(Debug, Clone)]
pub struct AdminAuth(pub Manager);

#[async_trait]
impl<C, S> FromRequestParts<CcState<C, S>> for AdminAuth
where
    C: Catalog + 'static,
    S: ScvClient + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &CcState<C, S>,
    ) -> Result<Self, Self::Rejection> {
        let ManagerAuth(manager) = ManagerAuth::from_request_parts(parts, state).await?;
        if manager.role != Role::Admin {
            return Err(ApiError::admin_only());
        }
        Ok(Self(manager))
    }
}

/// The engine key a core presented, unresolved.
#[derive(Debug, Clone)]
pub struct EngineKeyHeader(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for EngineKeyHeader {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header(parts, ENGINE_KEY_HEADER).or_else(|| header(parts, AUTHORIZATION.as_str()));
        Ok(Self(credential(raw)?.to_string()))
    }
}

/// An SCV, identified by the cluster secret.
#[derive(Debug, Clone, Copy)]
pub struct ClusterAuth;

#[async_trait]
impl<C, S> FromRequestParts<CcState<C, S>> for ClusterAuth
where
    C: Catalog + 'static,
    S: ScvClient + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &CcState<C, S>,
    ) -> Result<Self, Self::Rejection> {
        let given = credential(header(parts, AUTHORIZATION.as_str()))?;
        let expected = &state.cc.config().cluster_secret;
        if expected.is_empty() || !secrets_match(given, expected) {
            return Err(ApiError::AuthBad("bad cluster secret".to_string()));
        }
        Ok(Self)
    }
}
