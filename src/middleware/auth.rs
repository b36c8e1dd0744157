use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::{dto::auth::Claims, entity::users::Entity as Users, error::AppError, state::AppState};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// Where a request came from; recorded on every activity log entry.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub client: ClientInfo,
}

impl AuthUser {
    pub fn new(user_id: Uuid, is_admin: bool) -> Self {
        Self {
            user_id,
            is_admin,
            client: ClientInfo::default(),
        }
    }

    pub fn role(&self) -> &'static str {
        if self.is_admin { ROLE_ADMIN } else { ROLE_USER }
    }
}

/// Capability check performed at the top of every admin operation.
pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    if !user.is_admin {
        tracing::warn!(user_id = %user.user_id, "admin capability required");
        return Err(AppError::Forbidden);
    }
    Ok(())
}

impl ClientInfo {
    fn from_parts(parts: &axum::http::request::Parts) -> Self {
        let ip_address = forwarded_ip(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            ip_address,
            user_agent,
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo::from_parts(parts))
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_str = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::Unauthorized)?
            .to_str()
            .map_err(|_| AppError::Unauthorized)?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized)?
            .trim();

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            AppError::Unauthorized
        })?;

        let user_id =
            Uuid::parse_str(&decoded.claims.sub).map_err(|_| AppError::Unauthorized)?;

        // Flags are read from the account, not the token: a demotion or
        // deactivation applies to tokens that are already issued.
        let account = Users::find_by_id(user_id)
            .one(&state.orm)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if !account.is_active {
            tracing::debug!(%user_id, "token for deactivated account");
            return Err(AppError::Forbidden);
        }

        Ok(AuthUser {
            user_id,
            is_admin: account.is_admin,
            client: ClientInfo::from_parts(parts),
        })
    }
}
