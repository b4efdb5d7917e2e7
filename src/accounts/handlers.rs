use axum::{
    extract::{DefaultBodyLimit, FromRef, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    accounts::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, PublicAccount, RefreshRequest,
            RegisterRequest,
        },
        email::normalize_email,
        error::AccountError,
        extractors::{AdminAccount, CurrentAccount},
        jwt::JwtKeys,
        permissions::{has_permission, Action},
        policy::{validate_password, PolicyContext},
        repo_types::{Account, AccountQuery, ProfileUpdate},
    },
    state::AppState,
    storage::{avatar_key, ext_from_mime},
};

type ApiResult<T> = Result<T, (StatusCode, String)>;

const AVATAR_MAX_BYTES: usize = 5 * 1024 * 1024;
const AVATAR_URL_TTL_SECS: u64 = 10 * 60;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route("/me/password", put(change_password))
        .route(
            "/me/avatar",
            get(get_avatar)
                .put(upload_avatar)
                .delete(delete_avatar)
                .layer(DefaultBodyLimit::max(AVATAR_MAX_BYTES)),
        )
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/accounts", get(list_accounts))
        .route("/admin/accounts/:id/activate", post(activate_account))
        .route("/admin/accounts/:id/deactivate", post(deactivate_account))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
}

fn rejection(e: AccountError) -> (StatusCode, String) {
    if matches!(e, AccountError::Hashing(_) | AccountError::Storage(_)) {
        error!(error = %e, "account operation failed");
    }
    e.into_rejection()
}

fn require(account: &Account, action: Action) -> ApiResult<()> {
    if has_permission(account, action) {
        Ok(())
    } else {
        warn!(account_id = %account.id, ?action, "permission denied");
        Err((StatusCode::FORBIDDEN, "Permission denied".into()))
    }
}

fn issue_tokens(state: &AppState, account: Account) -> ApiResult<AuthResponse> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(account.id).map_err(internal)?;
    let refresh_token = keys.sign_refresh(account.id).map_err(internal)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        account: account.into(),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let email = normalize_email(&payload.email).map_err(AccountError::into_rejection)?;
    let ctx = PolicyContext {
        email: &email,
        name: &payload.name,
    };
    if let Err(e) = validate_password(&payload.password, &ctx) {
        warn!(%email, reason = %e, "weak password");
        return Err(e.into_rejection());
    }

    let account = state
        .accounts
        .create_account(&email, Some(&payload.password), payload.fields())
        .await
        .map_err(rejection)?;

    info!(account_id = %account.id, email = %account.email, "account registered");
    Ok((StatusCode::CREATED, Json(issue_tokens(&state, account)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let account = state
        .accounts
        .authenticate(&payload.email, &payload.password)
        .await
        .map_err(rejection)?;
    Ok(Json(issue_tokens(&state, account)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

    let account = state.accounts.get(claims.sub).await.map_err(|e| match e {
        AccountError::NotFound => (StatusCode::UNAUTHORIZED, "Account not found".to_string()),
        other => rejection(other),
    })?;
    if !account.is_active {
        return Err((StatusCode::UNAUTHORIZED, "Account is disabled".into()));
    }
    Ok(Json(issue_tokens(&state, account)?))
}

#[instrument(skip_all)]
pub async fn get_me(CurrentAccount(account): CurrentAccount) -> ApiResult<Json<PublicAccount>> {
    require(&account, Action::ViewOwnProfile)?;
    Ok(Json(account.into()))
}

#[instrument(skip(state, account, update), fields(account_id = %account.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<PublicAccount>> {
    require(&account, Action::EditOwnProfile)?;
    let account = state
        .accounts
        .update_profile(account.id, update)
        .await
        .map_err(rejection)?;
    Ok(Json(account.into()))
}

#[instrument(skip(state, account, payload), fields(account_id = %account.id))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    require(&account, Action::EditOwnProfile)?;
    if !state
        .accounts
        .check_password(&account, &payload.current_password)
        .map_err(rejection)?
    {
        warn!("current password mismatch");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }
    let ctx = PolicyContext {
        email: &account.email,
        name: &account.name,
    };
    validate_password(&payload.new_password, &ctx).map_err(AccountError::into_rejection)?;

    state
        .accounts
        .set_password(account.id, Some(&payload.new_password))
        .await
        .map_err(rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /me/avatar with the raw image as body and its type in Content-Type.
#[instrument(skip(state, account, headers, body), fields(account_id = %account.id, size = body.len()))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<PublicAccount>> {
    require(&account, Action::EditOwnProfile)?;
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Image body is required".into()));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let Some(ext) = ext_from_mime(&content_type) else {
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported image type".into(),
        ));
    };

    let key = avatar_key(account.id, ext);
    state
        .storage
        .put_object(&key, body, &content_type)
        .await
        .map_err(internal)?;

    let (account, previous) = state
        .accounts
        .set_avatar(account.id, Some(key))
        .await
        .map_err(rejection)?;
    if let Some(old) = previous {
        remove_object(&state, &old).await;
    }
    Ok(Json(account.into()))
}

#[instrument(skip(state, account), fields(account_id = %account.id))]
pub async fn delete_avatar(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
) -> ApiResult<StatusCode> {
    require(&account, Action::EditOwnProfile)?;
    let (_, previous) = state
        .accounts
        .set_avatar(account.id, None)
        .await
        .map_err(rejection)?;
    if let Some(old) = previous {
        remove_object(&state, &old).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 307 to a presigned URL of the current avatar.
#[instrument(skip(state, account), fields(account_id = %account.id))]
pub async fn get_avatar(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
) -> Response {
    let Some(key) = account.avatar else {
        return (StatusCode::NOT_FOUND, "Avatar not found").into_response();
    };
    match state.storage.presign_get(&key, AVATAR_URL_TTL_SECS).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

async fn remove_object(state: &AppState, key: &str) {
    if let Err(e) = state.storage.delete_object(key).await {
        warn!(error = %e, %key, "failed to delete replaced avatar");
    }
}

#[instrument(skip(state, account), fields(account_id = %account.id))]
pub async fn list_accounts(
    State(state): State<AppState>,
    AdminAccount(account): AdminAccount,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<PublicAccount>>> {
    require(&account, Action::ViewAccounts)?;
    let rows = state.accounts.list(query).await.map_err(rejection)?;
    Ok(Json(rows.into_iter().map(PublicAccount::from).collect()))
}

pub async fn activate_account(
    state: State<AppState>,
    current: AdminAccount,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PublicAccount>> {
    set_active(state, current, id, true).await
}

pub async fn deactivate_account(
    state: State<AppState>,
    current: AdminAccount,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PublicAccount>> {
    set_active(state, current, id, false).await
}

#[instrument(skip(state, account), fields(actor = %account.id))]
async fn set_active(
    State(state): State<AppState>,
    AdminAccount(account): AdminAccount,
    target: Uuid,
    active: bool,
) -> ApiResult<Json<PublicAccount>> {
    require(&account, Action::ManageAccounts)?;
    let updated = state
        .accounts
        .set_active(target, active)
        .await
        .map_err(rejection)?;
    Ok(Json(updated.into()))
}
