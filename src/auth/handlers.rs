use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, MessageResponse, RegisterRequest, UserEnvelope},
        extractors::AuthUser,
        repo_types::Role,
        services::{authenticate, create_identity, validate_registration},
    },
    error::{ApiJson, AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

/// Open registration for plain users; assigning any other role needs an admin token.
#[instrument(skip(state, caller, payload))]
pub async fn register(
    State(state): State<AppState>,
    caller: Option<AuthUser>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserEnvelope>)> {
    let reg = validate_registration(payload)?;

    if reg.role != Role::User {
        match caller {
            Some(AuthUser(claims)) if claims.role == Role::Admin => {
                info!(admin_id = %claims.id, role = %reg.role, "admin assigning role");
            }
            _ => {
                warn!(email = %reg.email, role = %reg.role, "role assignment without admin token");
                return Err(AppError::Authorization(
                    "only an admin can register users with this role".into(),
                ));
            }
        }
    }

    let user = create_identity(state.users.as_ref(), reg).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserEnvelope {
            success: true,
            data: user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (user, token) =
        authenticate(state.users.as_ref(), &state.jwt, &payload.email, &payload.password).await?;
    Ok(Json(LoginResponse {
        success: true,
        token,
        user: user.into(),
    }))
}

#[instrument(skip(state, claims))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AppResult<Json<UserEnvelope>> {
    let user = state
        .users
        .find_by_id(claims.id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(Json(UserEnvelope {
        success: true,
        data: user.into(),
    }))
}

/// Tokens are not tracked server-side; the client discards its copy.
#[instrument(skip(claims))]
pub async fn logout(AuthUser(claims): AuthUser) -> Json<MessageResponse> {
    info!(user_id = %claims.id, "user logged out");
    Json(MessageResponse {
        success: true,
        message: "logged out".into(),
    })
}
