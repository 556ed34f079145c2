use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};

use crate::{
    accounts::{self, TeacherSummary, TokenPair, UserProfile},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Role, TeacherAccountPatch, UserProfilePatch},
    response::{ApiResponse, CountResponse},
    routes::{documents::file_response, form::MultipartForm},
    state::AppState,
    store::{non_blank, users},
};

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub role_id: i32,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct UpdateTeacherRequest {
    pub user_id: Option<i32>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> AppResult<ApiResponse<RegisterResponse>> {
    let mut conn = state.db()?;
    let role = accounts::register(
        &mut conn,
        &payload.email,
        &payload.username,
        &payload.password,
    )?;
    Ok(ApiResponse::created(
        "registration successful",
        RegisterResponse {
            role_id: role.id(),
            role,
        },
    ))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, AppError>,
) -> AppResult<ApiResponse<TokenPair>> {
    let mut conn = state.db()?;
    let pair = accounts::login(&mut conn, &state.tokens, &payload.username, &payload.password)?;
    Ok(ApiResponse::ok("login successful", pair))
}

pub async fn refresh(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RefreshRequest>, AppError>,
) -> AppResult<ApiResponse<TokenPair>> {
    let mut conn = state.db()?;
    let pair = accounts::refresh(&mut conn, &state.tokens, &payload.refresh_token)?;
    Ok(ApiResponse::ok("token refreshed", pair))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<ForgotPasswordRequest>, AppError>,
) -> AppResult<ApiResponse<()>> {
    accounts::reset_password(&state, &payload.email).await?;
    Ok(ApiResponse::message(
        "a new password has been sent to your email",
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<ApiResponse<()>> {
    let mut conn = state.db()?;
    accounts::logout(&mut conn, user.user_id)?;
    Ok(ApiResponse::message("logged out"))
}

pub async fn me(user: AuthenticatedUser) -> ApiResponse<AuthenticatedUser> {
    ApiResponse::ok("authenticated user", user)
}

pub async fn update_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<ChangePasswordRequest>, AppError>,
) -> AppResult<ApiResponse<()>> {
    let mut conn = state.db()?;
    accounts::change_password(
        &mut conn,
        user.user_id,
        &payload.old_password,
        &payload.new_password,
    )?;
    Ok(ApiResponse::message("password updated"))
}

pub async fn update_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<ApiResponse<UserProfile>> {
    let mut form = MultipartForm::read(multipart, "image", state.files.max_upload_bytes()).await?;

    let target = form.parse::<i32>("user_id")?.unwrap_or(user.user_id);
    user.require_self_or_admin(target)?;

    let patch = UserProfilePatch {
        full_name: form.text("full_name"),
        date_of_birth: form.date("date_of_birth")?,
        birthplace: form.text("birthplace"),
        major: form.text("major"),
        years_of_service: form.parse("years_of_service")?,
        gender: form.text("gender"),
        phone: form.text("phone"),
        unit_name: form.text("unit_name"),
        field: form.text("field"),
        image_path: None,
        teacher_code: form.parse("teacher_code")?,
    };
    let image = form.take_file();

    let profile = accounts::update_profile(&state, target, patch, image).await?;
    Ok(ApiResponse::ok("profile updated", profile))
}

pub async fn update_teacher(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateTeacherRequest>, AppError>,
) -> AppResult<ApiResponse<TeacherSummary>> {
    user.require_admin()?;
    let teacher_id = payload
        .user_id
        .ok_or_else(|| AppError::bad_request("user_id is required"))?;

    let patch = TeacherAccountPatch {
        email: non_blank(payload.email),
        username: non_blank(payload.username),
        phone: non_blank(payload.phone),
    };

    let mut conn = state.db()?;
    let updated = accounts::update_teacher(&mut conn, teacher_id, patch)?;
    Ok(ApiResponse::ok("teacher updated", updated))
}

pub async fn reset_teacher_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(teacher_id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<()>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    accounts::admin_reset_teacher_password(
        &mut conn,
        &state.config.default_teacher_password,
        teacher_id,
    )?;
    Ok(ApiResponse::message("teacher password reset to default"))
}

pub async fn delete_teacher(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(teacher_id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<()>> {
    user.require_admin()?;
    accounts::delete_teacher(&state, teacher_id).await?;
    Ok(ApiResponse::message("teacher and their documents deleted"))
}

pub async fn list_users(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<UserProfile>>> {
    let mut conn = state.db()?;
    Ok(ApiResponse::ok("users", accounts::list_users(&mut conn)?))
}

pub async fn list_teachers(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<TeacherSummary>>> {
    let mut conn = state.db()?;
    Ok(ApiResponse::ok("teachers", accounts::list_teachers(&mut conn)?))
}

pub async fn user_count(State(state): State<AppState>) -> AppResult<ApiResponse<CountResponse>> {
    let mut conn = state.db()?;
    let count = accounts::user_count(&mut conn)?;
    Ok(ApiResponse::ok("user count", CountResponse { count }))
}

pub async fn get_user(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<UserProfile>> {
    let mut conn = state.db()?;
    Ok(ApiResponse::ok("user", accounts::get_user(&mut conn, user_id)?))
}

pub async fn profile_image(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<Response> {
    let image_path = {
        let mut conn = state.db()?;
        users::find(&mut conn, user_id)?
            .ok_or_else(|| AppError::not_found_with("user not found"))?
            .image_path
            .ok_or_else(|| AppError::not_found_with("user has no profile image"))?
    };

    let bytes = state.files.read(&image_path).await?;
    file_response(bytes, &image_path, None, false)
}
