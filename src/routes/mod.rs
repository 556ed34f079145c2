use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod documents;
pub mod form;
pub mod health;
pub mod specializations;

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn require_auth(
    state: &AppState,
) -> middleware::FromExtractorLayer<AuthenticatedUser, AppState> {
    middleware::from_extractor_with_state::<AuthenticatedUser, _>(state.clone())
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());
    let body_limit = state.files.max_upload_bytes() + MULTIPART_OVERHEAD_BYTES;

    let public_auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh))
        .route("/forgot-password", post(auth::forgot_password));

    let protected_auth_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/updatePassword", put(auth::update_password))
        .route("/updateUser", put(auth::update_user))
        .route("/updateTeacher", put(auth::update_teacher))
        .route(
            "/resetTeacherPassword/:id",
            post(auth::reset_teacher_password),
        )
        .route("/deleteTeacher/:id", delete(auth::delete_teacher))
        .route("/getAllUsers", get(auth::list_users))
        .route("/getTeachers", get(auth::list_teachers))
        .route("/user-count", get(auth::user_count))
        .route("/getUserById/:id", get(auth::get_user))
        .route("/image/:id", get(auth::profile_image));

    let specialization_routes = Router::new()
        .route(
            "/chuyennganh",
            get(specializations::list_specializations),
        )
        .route(
            "/chuyennganh/count",
            get(specializations::count_specializations),
        )
        .route(
            "/addChuyenNganh",
            post(specializations::create_specialization),
        )
        .route(
            "/chuyennganh/updateChuyenNganh",
            put(specializations::update_specialization),
        )
        .route(
            "/chuyennganh/deleteChuyenNganh/:id",
            delete(specializations::delete_specialization),
        );

    let document_routes = Router::new()
        .route("/", get(documents::list_documents))
        .route("/count", get(documents::count_documents))
        .route("/:id", get(documents::get_document))
        .route(
            "/getDulieuID/:user_id",
            get(documents::list_documents_by_owner),
        )
        .route("/addDulieu", post(documents::upload_document))
        .route("/updateDulieu/:id", put(documents::update_document))
        .route("/deleteDulieu/:id", delete(documents::delete_document))
        .route("/download/:id", get(documents::download_document))
        .route("/view/:id", get(documents::view_document));

    let auth_routes = public_auth_routes.merge(
        protected_auth_routes.route_layer(require_auth(&state)),
    );

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/dulieu", document_routes.route_layer(require_auth(&state)))
        .nest("/api", specialization_routes.route_layer(require_auth(&state)))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
