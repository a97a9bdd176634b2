use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use poehali_shared::AccountRef;

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_USER: &str = "USER";
pub const ROLE_DRIVER: &str = "DRIVER";
pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_SUPER_ADMIN: &str = "SUPER_ADMIN";

// ============================================================================
// JWT Claims
// ============================================================================

/// Passenger or driver session. `sub` is the user or driver id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl SessionClaims {
    pub fn subject_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("invalid token subject".to_string()))
    }

    /// The balance this session owns
    pub fn account(&self) -> Result<AccountRef, AppError> {
        let id = self.subject_id()?;
        match self.role.as_str() {
            ROLE_DRIVER => Ok(AccountRef::driver(id)),
            _ => Ok(AccountRef::user(id)),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == ROLE_USER
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub exp: usize,
}

/// Session on routes where signing in is optional
#[derive(Debug, Clone, Default)]
pub struct Viewer(pub Option<SessionClaims>);

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
}

fn decode_claims<T: DeserializeOwned>(secret: &str, token: &str) -> Result<T, AppError> {
    decode::<T>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::AuthenticationError("invalid or expired token".to_string()))
}

// ============================================================================
// Session Middleware
// ============================================================================

/// Passengers and drivers alike
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 1. Extract token
    let token = bearer_token(req.headers()).ok_or_else(AppError::unauthenticated)?;

    // 2. Decode and validate JWT
    let claims: SessionClaims = decode_claims(&state.auth.secret, &token)?;

    // 3. Check role
    if claims.role != ROLE_USER && claims.role != ROLE_DRIVER {
        return Err(AppError::forbidden("session role required"));
    }

    // 4. Inject claims
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

pub async fn driver_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(AppError::unauthenticated)?;
    let claims: SessionClaims = decode_claims(&state.auth.secret, &token)?;

    if claims.role != ROLE_DRIVER {
        return Err(AppError::forbidden("driver role required"));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Anonymous requests pass with an empty [`Viewer`]; a bad token is still rejected.
pub async fn optional_session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let viewer = match bearer_token(req.headers()) {
        Some(token) => Viewer(Some(decode_claims::<SessionClaims>(&state.auth.secret, &token)?)),
        None => Viewer(None),
    };

    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

// ============================================================================
// Admin Authentication Middleware
// ============================================================================

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 1. Extract token
    let token = bearer_token(req.headers()).ok_or_else(AppError::unauthenticated)?;

    // 2. Decode JWT
    let claims: AdminClaims = decode_claims(&state.auth.secret, &token)?;

    // 3. Check role is ADMIN or SUPER_ADMIN
    if claims.role != ROLE_ADMIN && claims.role != ROLE_SUPER_ADMIN {
        return Err(AppError::forbidden("admin role required"));
    }

    // 4. Inject claims
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

// ============================================================================
// Permission Check Helpers
// ============================================================================

pub fn has_permission(claims: &AdminClaims, permission: &str) -> bool {
    claims.role == ROLE_SUPER_ADMIN || claims.permissions.iter().any(|p| p == permission)
}

pub fn require_permission(claims: &AdminClaims, permission: &str) -> Result<(), AppError> {
    if has_permission(claims, permission) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("missing permission {}", permission)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(role: &str, permissions: &[&str]) -> AdminClaims {
        AdminClaims {
            sub: "staff-1".to_string(),
            email: "staff@poehali.test".to_string(),
            role: role.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            exp: 0,
        }
    }

    #[test]
    fn test_super_admin_holds_every_permission() {
        assert!(has_permission(&admin(ROLE_SUPER_ADMIN, &[]), "ledger:adjust"));
        assert!(has_permission(&admin(ROLE_ADMIN, &["ledger:confirm"]), "ledger:confirm"));
        assert!(!has_permission(&admin(ROLE_ADMIN, &["ledger:confirm"]), "ledger:adjust"));
    }

    #[test]
    fn test_session_account_follows_role() {
        let id = Uuid::new_v4();
        let driver = SessionClaims { sub: id.to_string(), role: ROLE_DRIVER.to_string(), exp: 0 };
        let user = SessionClaims { sub: id.to_string(), role: ROLE_USER.to_string(), exp: 0 };

        assert_eq!(driver.account().unwrap(), AccountRef::driver(id));
        assert_eq!(user.account().unwrap(), AccountRef::user(id));

        let broken = SessionClaims { sub: "nope".to_string(), role: ROLE_USER.to_string(), exp: 0 };
        assert!(broken.subject_id().is_err());
    }
}
