/*!
 * # Authentication capability
 *
 * Tokens are issued elsewhere; this module only verifies HS256 bearer tokens
 * and turns them into an [`AuthUser`] with an id and a set of roles.
 *
 * - [`AuthUser`] rejects requests without a valid token (401).
 * - [`MaybeAuthUser`] lets anonymous requests through but still rejects a
 *   malformed or expired token.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ServiceError;

pub const ROLE_ADMIN: &str = "admin";
/// Role carried by trusted backend callers (checkout workers, webhooks).
pub const ROLE_SERVICE: &str = "service";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    #[serde(default)]
    pub roles: Vec<String>,
    /// Single-role form used by older token issuers
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iss: Option<String>,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Check if the user is an admin
    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("admin role required".to_string()))
        }
    }

    /// Admins and backend services may call internal endpoints.
    pub fn require_internal(&self) -> Result<(), ServiceError> {
        if self.is_admin() || self.has_role(ROLE_SERVICE) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("service role required".to_string()))
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        let mut roles = claims.roles;
        if let Some(role) = claims.role {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self {
            user_id: claims.sub,
            roles,
        }
    }
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").finish_non_exhaustive()
    }
}

impl AuthConfig {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    /// Validate a JWT token and resolve the caller
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let validation = Validation::new(Algorithm::HS256);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                debug!("Rejected bearer token: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        ServiceError::Unauthorized("token expired".to_string())
                    }
                    _ => ServiceError::Unauthorized("invalid token".to_string()),
                }
            })?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(ServiceError::Unauthorized("token has no subject".to_string()));
        }

        Ok(claims.into())
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, ServiceError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ServiceError::Unauthorized("malformed authorization header".to_string()))?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Some)
        .ok_or_else(|| ServiceError::Unauthorized("expected a bearer token".to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthConfig: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;
        AuthConfig::from_ref(state).authenticate(token)
    }
}

/// Optional authentication for endpoints that also serve guests.
#[derive(Debug, Clone, Default)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    AuthConfig: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => AuthConfig::from_ref(state)
                .authenticate(token)
                .map(|user| MaybeAuthUser(Some(user))),
        }
    }
}
