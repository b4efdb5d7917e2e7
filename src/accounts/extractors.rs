use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use tracing::warn;

use super::{
    error::AccountError,
    jwt::JwtKeys,
    permissions::{has_permission, Action},
    repo_types::Account,
};
use crate::state::AppState;

/// The active account behind a valid access token.
pub struct CurrentAccount(pub Account);

#[async_trait]
impl FromRequestParts<AppState> for CurrentAccount {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing Authorization header".to_string()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid auth scheme".to_string()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(token).map_err(|_| {
            warn!("invalid or expired token");
            (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
        })?;

        let account = match state.accounts.get(claims.sub).await {
            Ok(a) => a,
            Err(AccountError::NotFound) => {
                return Err((StatusCode::UNAUTHORIZED, "Account not found".into()))
            }
            Err(e) => return Err(e.into_rejection()),
        };
        if !account.is_active {
            warn!(account_id = %account.id, "token for inactive account");
            return Err((StatusCode::UNAUTHORIZED, "Account is disabled".into()));
        }

        Ok(CurrentAccount(account))
    }
}

/// A [`CurrentAccount`] allowed onto the admin surface.
pub struct AdminAccount(pub Account);

#[async_trait]
impl FromRequestParts<AppState> for AdminAccount {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentAccount(account) = CurrentAccount::from_request_parts(parts, state).await?;
        if !has_permission(&account, Action::AccessAdmin) {
            warn!(account_id = %account.id, "admin access denied");
            return Err((StatusCode::FORBIDDEN, "Admin access required".into()));
        }
        Ok(AdminAccount(account))
    }
}
