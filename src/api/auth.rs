use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, OriginalUri, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use super::extract::JsonBody;
use super::response::ApiResponse;
use crate::config::AuthConfig;
use crate::db::{
    now_rfc3339, DbPool, LoginRequest, LoginResponse, User, UserResponse, SYSTEM_USER_ID,
};
use crate::AppState;

/// Header and cookie name carrying the session token
pub const TOKEN_NAME: &str = "token";

/// The authenticated caller, attached to the request by [`auth_middleware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub email: String,
    pub superadmin: bool,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            superadmin: user.superadmin,
        }
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token from the `token` header, `Authorization: Bearer` or the `token` cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get(TOKEN_NAME).and_then(|h| h.to_str().ok()) {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(token) = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(TOKEN_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolve a token to its user.
///
/// The configured admin token maps to the seeded system user. Any other
/// token must belong to an unexpired session of an active user.
pub async fn resolve_user(
    db: &DbPool,
    auth: &AuthConfig,
    token: &str,
) -> Result<Option<CurrentUser>, sqlx::Error> {
    let admin_token = auth.admin_token.as_bytes();
    let provided_token = token.as_bytes();

    // An unset admin token never matches. Otherwise compare in constant time
    if !admin_token.is_empty()
        && admin_token.len() == provided_token.len()
        && admin_token.ct_eq(provided_token).into()
    {
        return Ok(User::find_by_id(db, SYSTEM_USER_ID)
            .await?
            .map(CurrentUser::from));
    }

    let user: Option<User> = sqlx::query_as(
        r#"
        SELECT u.* FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = ? AND s.expires_at > ? AND u.active = 1
        "#,
    )
    .bind(hash_token(token))
    .bind(now_rfc3339())
    .fetch_optional(db)
    .await?;

    Ok(user.map(CurrentUser::from))
}

/// Create a session for `user_id` and return its plaintext token
pub async fn create_session(db: &DbPool, user_id: i64, ttl_hours: i64) -> Result<String, ApiError> {
    let token = generate_token();
    let expires_at = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(ttl_hours))
        .ok_or_else(|| ApiError::internal("Invalid session lifetime"))?
        .to_rfc3339();

    sqlx::query("INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(&expires_at)
        .execute(db)
        .await?;

    Ok(token)
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    let user = User::find_by_email(&state.db, &request.email)
        .await?
        .filter(|user| verify_password(&request.password, &user.password_hash))
        .ok_or_else(|| {
            tracing::warn!(email = %request.email, "Failed login attempt");
            ApiError::unauthorized("Invalid credentials")
        })?;

    let token = create_session(&state.db, user.id, state.config.auth.session_ttl_hours).await?;
    tracing::info!(user_id = user.id, "User logged in");

    Ok(ApiResponse::ok(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

/// Validate token endpoint
pub async fn validate(user: CurrentUser) -> ApiResponse<UserResponse> {
    ApiResponse::ok(UserResponse {
        id: user.id,
        email: user.email,
        superadmin: user.superadmin,
    })
}

/// Auth middleware that validates tokens and attaches the [`CurrentUser`]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // Nested routers see a stripped URI
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let whitelisted = state.config.rbac.whitelist.iter().any(|p| *p == path);
    if whitelisted {
        return Ok(next.run(request).await);
    }

    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Unauthorized User"))?;

    let user = resolve_user(&state.db, &state.config.auth, &token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Unauthorized User"))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Sync the seeded admin account with the auth config.
///
/// Sets its email and, when `admin_password` is configured, its password.
pub async fn ensure_admin_user(db: &DbPool, auth: &AuthConfig) -> anyhow::Result<()> {
    sqlx::query("UPDATE users SET email = ?, updated_at = ? WHERE id = ?")
        .bind(&auth.admin_email)
        .bind(now_rfc3339())
        .bind(SYSTEM_USER_ID)
        .execute(db)
        .await?;

    if let Some(password) = auth.admin_password.as_deref().filter(|p| !p.is_empty()) {
        let password_hash = hash_password(password)
            .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(&password_hash)
            .bind(SYSTEM_USER_ID)
            .execute(db)
            .await?;
        tracing::info!(email = %auth.admin_email, "Admin password set from configuration");
    }

    Ok(())
}

/// Extractor for the user attached by [`auth_middleware`]
#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Unauthorized User"))
    }
}
