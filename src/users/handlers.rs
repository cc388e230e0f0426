use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_cookies::Cookies;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{
        is_valid_email, present, ChangePasswordRequest, LoginRequest, LoginResponse,
        RefreshRequest, UpdateDetailsRequest,
    },
    repo_types::{NewUser, PublicUser},
};
use crate::{
    auth::{
        cookies::{clear_token_cookies, set_token_cookies, REFRESH_COOKIE},
        services::{self as credentials, TokenPair},
        CurrentUser,
    },
    error::AppError,
    media::{self, UploadedMedia},
    response::{ApiResponse, Empty},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", post(change_password))
        .route("/current-user", get(current_user))
        .route("/update-information", post(update_details))
}

pub fn upload_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/avatar-updating", post(update_avatar))
        .route("/coverImage-updating", post(update_cover_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

fn internal(e: anyhow::Error) -> AppError {
    error!(error = ?e, "internal error");
    AppError::Internal("Something went wrong".into())
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let mut form = media::read_form(mp, &state.config.media.upload_dir, &["avatar", "coverImage"])
        .await?;

    let password = form
        .fields
        .get("password")
        .filter(|p| !p.trim().is_empty())
        .cloned();
    let (Some(full_name), Some(email), Some(username), Some(password)) = (
        form.text("fullName").map(str::to_string),
        form.text("email").map(str::to_lowercase),
        form.text("username").map(str::to_lowercase),
        password,
    ) else {
        return Err(AppError::bad_request("All fields are required"));
    };

    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::bad_request("Enter a valid email"));
    }

    if state
        .store
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        warn!(%username, %email, "username or email already registered");
        return Err(AppError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let avatar_file = form
        .take_file("avatar")
        .ok_or_else(|| AppError::bad_request("Avatar file is required"))?;
    let cover_file = form.take_file("coverImage");

    let avatar = media::upload(&state, avatar_file)
        .await
        .ok_or_else(|| AppError::bad_request("Error occurred while uploading avatar"))?;
    let cover_image = match cover_file {
        Some(file) => media::upload(&state, file).await,
        None => None,
    };

    let password_hash = state.hasher.hash(&password).map_err(internal)?;

    let created = state
        .store
        .create(NewUser {
            username,
            email,
            full_name,
            avatar: avatar.url.clone(),
            cover_image: cover_image.as_ref().map(|m| m.url.clone()),
            password_hash,
        })
        .await;
    let user = match created {
        Ok(u) => u,
        Err(e) => {
            discard(&state, Some(&avatar)).await;
            discard(&state, cover_image.as_ref()).await;
            return Err(e.into());
        }
    };

    let created = state
        .store
        .find_by_id(user.id)
        .await?
        .ok_or_else(|| AppError::Internal("Something went wrong while registering the user".into()))?;

    info!(user_id = %created.id, username = %created.username, "user registered");
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        created.into(),
        "User registered successfully",
    ))
}

async fn discard(state: &AppState, uploaded: Option<&UploadedMedia>) {
    if let Some(m) = uploaded {
        media::remove(state, &m.url).await;
    }
}

#[instrument(skip(state, cookies, payload))]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginResponse>, AppError> {
    let Json(payload) = payload?;
    let email = present(payload.email.as_deref()).map(str::to_lowercase);
    let username = present(payload.username.as_deref()).map(str::to_lowercase);

    if email.is_none() && username.is_none() {
        return Err(AppError::bad_request("username or email is required"));
    }
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("password is required"))?;

    let user = state
        .store
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| {
            warn!(?username, ?email, "login unknown user");
            AppError::NotFound("User not found".into())
        })?;

    if !credentials::verify_password(&state, &user, &password) {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid user credentials"));
    }

    let pair = credentials::issue_token_pair(&state, user.id).await?;
    set_token_cookies(&cookies, &pair, state.config.cookie_secure);

    info!(user_id = %user.id, "user logged in");
    Ok(ApiResponse::ok(
        LoginResponse {
            user: user.into(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        },
        "User logged in successfully",
    ))
}

#[instrument(skip(state, cookies, user), fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
) -> Result<ApiResponse<Empty>, AppError> {
    credentials::logout(&state, user.id).await?;
    clear_token_cookies(&cookies, state.config.cookie_secure);
    Ok(ApiResponse::ok(Empty::default(), "User logged out"))
}

#[instrument(skip(state, cookies, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    cookies: Cookies,
    payload: Option<Json<RefreshRequest>>,
) -> Result<ApiResponse<TokenPair>, AppError> {
    let from_cookie = cookies
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let incoming = from_cookie.or_else(|| payload.and_then(|Json(body)| body.refresh_token));

    let pair = credentials::refresh(&state, incoming.as_deref()).await?;
    set_token_cookies(&cookies, &pair, state.config.cookie_secure);
    Ok(ApiResponse::ok(pair, "Access token refreshed"))
}

#[instrument(skip(state, current, payload), fields(user_id = %current.id))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<Empty>, AppError> {
    let Json(payload) = payload?;
    let new_password = payload
        .new_password
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("New password is required"))?;

    let user = state
        .store
        .find_by_id(current.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let old_password = payload.old_password.unwrap_or_default();
    if !credentials::verify_password(&state, &user, &old_password) {
        warn!("old password mismatch");
        return Err(AppError::unauthorized("Old password is incorrect"));
    }

    let hash = state.hasher.hash(&new_password).map_err(internal)?;
    if !state.store.set_password_hash(user.id, &hash).await? {
        return Err(AppError::NotFound("User not found".into()));
    }

    info!("password changed");
    Ok(ApiResponse::ok(Empty::default(), "Password changed successfully"))
}

pub async fn current_user(CurrentUser(user): CurrentUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(user, "User details fetched successfully")
}

#[instrument(skip(state, current, payload), fields(user_id = %current.id))]
pub async fn update_details(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    payload: Result<Json<UpdateDetailsRequest>, JsonRejection>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let Json(payload) = payload?;
    let full_name = present(payload.full_name.as_deref())
        .ok_or_else(|| AppError::bad_request("Full name is required"))?;
    let email = present(payload.email.as_deref()).map(str::to_lowercase);

    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(AppError::bad_request("Enter a valid email"));
        }
    }

    let user = state
        .store
        .update_details(current.id, full_name, email.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!("account details updated");
    Ok(ApiResponse::ok(
        user.into(),
        "Account details updated successfully",
    ))
}

#[instrument(skip(state, current, mp), fields(user_id = %current.id))]
pub async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let mut form = media::read_form(mp, &state.config.media.upload_dir, &["avatar"]).await?;
    let file = form
        .take_file("avatar")
        .ok_or_else(|| AppError::bad_request("Avatar file is missing"))?;

    let uploaded = media::upload(&state, file)
        .await
        .ok_or_else(|| AppError::bad_request("Error while uploading avatar"))?;

    media::remove(&state, &current.avatar).await;

    let user = state
        .store
        .set_avatar(current.id, &uploaded.url)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(avatar = %uploaded.url, "avatar updated");
    Ok(ApiResponse::ok(user.into(), "Avatar updated successfully"))
}

#[instrument(skip(state, current, mp), fields(user_id = %current.id))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let mut form = media::read_form(mp, &state.config.media.upload_dir, &["coverImage"]).await?;
    let file = form
        .take_file("coverImage")
        .ok_or_else(|| AppError::bad_request("Cover image file is missing"))?;

    let uploaded = media::upload(&state, file)
        .await
        .ok_or_else(|| AppError::bad_request("Error while uploading cover image"))?;

    if let Some(old) = &current.cover_image {
        media::remove(&state, old).await;
    }

    let user = state
        .store
        .set_cover_image(current.id, &uploaded.url)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(cover_image = %uploaded.url, "cover image updated");
    Ok(ApiResponse::ok(user.into(), "Cover image updated successfully"))
}
