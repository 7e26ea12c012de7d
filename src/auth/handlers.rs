use std::future::Future;
use std::time::Duration;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, ProfileResponse, RegisterRequest, UpdateProfileRequest},
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo_types::User,
    },
    error::ApiError,
    state::AppState,
};

lazy_static! {
    // Burned when login hits an unknown email, so the response takes as long
    // as a real password check and the two cases stay indistinguishable.
    static ref DUMMY_HASH: String =
        hash_password("timing-equalizer").expect("hashing a constant cannot fail");
}

const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounds a persistence call so a wedged store degrades to a transient server
/// error instead of hanging the request.
async fn bounded<T, F>(fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(STORE_TIMEOUT, fut).await {
        Ok(res) => res,
        Err(_) => Err(ApiError::Store(sqlx::Error::PoolTimedOut)),
    }
}

fn non_blank(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile", get(get_profile).put(update_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let (Some(first_name), Some(last_name), Some(email), Some(password)) = (
        non_blank(payload.first_name),
        non_blank(payload.last_name),
        non_blank(payload.email),
        non_blank(payload.password),
    ) else {
        warn!("registration with missing fields");
        return Err(ApiError::MissingFields);
    };

    // Pre-check is best effort; the unique constraint on email is the final
    // authority under concurrent registrations (see User::create).
    if bounded(User::find_by_email(&state.db, &email))
        .await?
        .is_some()
    {
        warn!(email = %email, "email already registered");
        return Err(ApiError::DuplicateEmail);
    }

    let hash = hash_password(&password)?;
    let user = bounded(User::create(
        &state.db,
        &email,
        &hash,
        &first_name,
        &last_name,
    ))
    .await?;

    let keys = JwtKeys::from_ref(&state);
    let authtoken = keys.sign(user.id, &user.email)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            authtoken,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (Some(email), Some(password)) = (non_blank(payload.email), non_blank(payload.password))
    else {
        warn!("login with missing fields");
        return Err(ApiError::MissingFields);
    };

    let user = match bounded(User::find_by_email(&state.db, &email)).await? {
        Some(u) => u,
        None => {
            let _ = verify_password(&password, &DUMMY_HASH);
            warn!(email = %email, "login unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !verify_password(&password, &user.password_hash) {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let authtoken = keys.sign(user.id, &user.email)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        authtoken,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
    }))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let record = bounded(User::find_by_id(&state.db, user.id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(record.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let (Some(first_name), Some(last_name)) = (
        non_blank(payload.first_name),
        non_blank(payload.last_name),
    ) else {
        warn!(user_id = %user.id, "profile update with missing fields");
        return Err(ApiError::MissingFields);
    };

    // The row is selected by the verified identity from the token, never by
    // anything in the request body.
    let record = bounded(User::update_names(
        &state.db,
        user.id,
        &first_name,
        &last_name,
    ))
    .await?
    .ok_or(ApiError::NotFound)?;

    info!(user_id = %user.id, "profile updated");
    Ok(Json(record.into()))
}
