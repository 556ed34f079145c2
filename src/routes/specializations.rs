use axum::extract::{Path, State};
use axum::Json;
use axum_extra::extract::WithRejection;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewSpecialization, Specialization, SpecializationPatch},
    response::{ApiResponse, CountResponse},
    state::AppState,
    store::{non_blank, specializations, users},
};

#[derive(Serialize)]
pub struct SpecializationResponse {
    pub id: i32,
    pub name: String,
    pub owner_user_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Specialization> for SpecializationResponse {
    fn from(value: Specialization) -> Self {
        Self {
            id: value.id,
            name: value.name,
            owner_user_id: value.owner_user_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateSpecializationRequest {
    pub name: Option<String>,
    pub owner_user_id: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateSpecializationRequest {
    pub id: Option<i32>,
    pub name: Option<String>,
    pub owner_user_id: Option<i32>,
}

pub async fn list_specializations(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<SpecializationResponse>>> {
    let mut conn = state.db()?;
    let rows = specializations::list(&mut conn)?
        .into_iter()
        .map(SpecializationResponse::from)
        .collect();
    Ok(ApiResponse::ok("specializations", rows))
}

pub async fn count_specializations(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<CountResponse>> {
    let mut conn = state.db()?;
    let count = specializations::count(&mut conn)?;
    Ok(ApiResponse::ok("specialization count", CountResponse { count }))
}

pub async fn create_specialization(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<
        Json<CreateSpecializationRequest>,
        AppError,
    >,
) -> AppResult<ApiResponse<SpecializationResponse>> {
    let (Some(name), Some(owner_user_id)) = (non_blank(payload.name), payload.owner_user_id) else {
        return Err(AppError::bad_request("name and owner_user_id are required"));
    };

    let mut conn = state.db()?;
    if specializations::name_taken(&mut conn, &name, None)? {
        return Err(AppError::conflict("specialization name already exists"));
    }
    if !users::exists(&mut conn, owner_user_id)? {
        return Err(AppError::not_found_with("owner user not found"));
    }

    let created = specializations::insert(
        &mut conn,
        &NewSpecialization {
            name,
            owner_user_id: Some(owner_user_id),
        },
    )?;

    info!(specialization_id = created.id, name = %created.name, "specialization created");
    Ok(ApiResponse::created(
        "specialization created",
        SpecializationResponse::from(created),
    ))
}

pub async fn update_specialization(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<
        Json<UpdateSpecializationRequest>,
        AppError,
    >,
) -> AppResult<ApiResponse<SpecializationResponse>> {
    let (Some(id), Some(name), Some(owner_user_id)) =
        (payload.id, non_blank(payload.name), payload.owner_user_id)
    else {
        return Err(AppError::bad_request(
            "id, name and owner_user_id are required",
        ));
    };

    let mut conn = state.db()?;

    let mut missing = Vec::new();
    if !specializations::exists(&mut conn, id)? {
        missing.push("specialization not found");
    }
    if !users::exists(&mut conn, owner_user_id)? {
        missing.push("owner user not found");
    }
    if !missing.is_empty() {
        return Err(AppError::not_found_with(missing.join("; ")));
    }

    if specializations::name_taken(&mut conn, &name, Some(id))? {
        return Err(AppError::conflict("specialization name already exists"));
    }

    let updated = specializations::apply_patch(
        &mut conn,
        id,
        &SpecializationPatch {
            name: Some(name),
            owner_user_id: Some(owner_user_id),
        },
    )?;

    info!(specialization_id = id, "specialization updated");
    Ok(ApiResponse::ok(
        "specialization updated",
        SpecializationResponse::from(updated),
    ))
}

pub async fn delete_specialization(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Path(id), _): WithRejection<Path<i32>, AppError>,
) -> AppResult<ApiResponse<()>> {
    let mut conn = state.db()?;
    if !specializations::exists(&mut conn, id)? {
        return Err(AppError::not_found_with("specialization not found"));
    }
    if specializations::is_referenced(&mut conn, id)? {
        return Err(AppError::conflict(
            "specialization is still used by documents",
        ));
    }

    specializations::delete(&mut conn, id)?;
    info!(specialization_id = id, user_id = user.user_id, "specialization deleted");
    Ok(ApiResponse::message("specialization deleted"))
}
