//! # API REST
//!
//! REST API for the study catalog.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, base64 file payloads, CORS, status codes)
//!
//! Catalog operations are blocking and run on tokio's blocking pool.

#![warn(rust_2018_idioms)]

pub mod dto;
pub mod error;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use catalog_core::{CatalogFilter, NewStudy, StudyError, StudyId, StudyService, TimeFilter};
use chrono::Local;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use dto::{
    CreateStudyReq, DownloadRes, ErrorRes, HealthRes, ListStudiesParams, ListStudiesRes,
    StudyFilePayload, StudyRes, UpdateStudyReq,
};
pub use error::ApiError;

/// Application state shared across REST handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<StudyService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_studies,
        create_study,
        get_study,
        update_study,
        delete_study,
        download_study,
    ),
    components(schemas(
        HealthRes,
        CreateStudyReq,
        UpdateStudyReq,
        StudyFilePayload,
        StudyRes,
        ListStudiesRes,
        DownloadRes,
        ErrorRes,
    ))
)]
pub struct ApiDoc;

/// Headroom for the JSON fields around a base64 file payload.
const JSON_ENVELOPE_BYTES: u64 = 64 * 1024;

/// Largest request body that can carry a file of `max_upload_bytes` as base64 JSON.
pub fn request_body_limit(max_upload_bytes: u64) -> usize {
    let encoded = max_upload_bytes.div_ceil(3).saturating_mul(4);
    usize::try_from(encoded.saturating_add(JSON_ENVELOPE_BYTES)).unwrap_or(usize::MAX)
}

/// Builds the REST router, including Swagger UI at `/swagger-ui`.
///
/// Request bodies are capped from `CoreConfig::max_upload_bytes` instead of axum's 2 MB default.
pub fn router(service: Arc<StudyService>) -> Router {
    let body_limit = request_body_limit(service.config().max_upload_bytes());
    Router::new()
        .route("/health", get(health))
        .route("/studies", get(list_studies).post(create_study))
        .route(
            "/studies/:id",
            get(get_study).put(update_study).delete(delete_study),
        )
        .route("/studies/:id/download", get(download_study))
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

fn parse_id(raw: &str) -> Result<StudyId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::from(StudyError::Validation(format!("invalid study id {raw:?}"))))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Study catalog REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/studies",
    params(ListStudiesParams),
    responses(
        (status = 200, description = "Matching studies, newest first", body = ListStudiesRes),
        (status = 400, description = "Unknown time filter", body = ErrorRes),
        (status = 502, description = "Metadata store query failed", body = ErrorRes)
    )
)]
/// List studies filtered by creation window and name substring.
///
/// # Errors
/// Returns `400` for an unknown `since` value and `502`/`504` if the query fails after retries.
#[axum::debug_handler]
async fn list_studies(
    State(state): State<AppState>,
    Query(params): Query<ListStudiesParams>,
) -> Result<Json<ListStudiesRes>, ApiError> {
    let time: TimeFilter = params.since.as_deref().unwrap_or_default().parse()?;
    let filter = CatalogFilter::new(time, params.search);
    let service = state.service.clone();
    let records = tokio::task::spawn_blocking(move || service.list_studies(&filter)).await??;

    let now = Local::now();
    Ok(Json(ListStudiesRes {
        studies: records
            .into_iter()
            .map(|record| StudyRes::from_record(record, &now))
            .collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/studies",
    request_body = CreateStudyReq,
    responses(
        (status = 201, description = "Study created", body = StudyRes),
        (status = 400, description = "Invalid input or non-DICOM file", body = ErrorRes),
        (status = 502, description = "Blob or metadata store failed", body = ErrorRes),
        (status = 504, description = "A backend call timed out", body = ErrorRes)
    )
)]
/// Create a study from a name, a description and a base64 DICOM file.
#[axum::debug_handler]
async fn create_study(
    State(state): State<AppState>,
    Json(req): Json<CreateStudyReq>,
) -> Result<(StatusCode, Json<StudyRes>), ApiError> {
    let input = NewStudy {
        name: req.name,
        description: req.description,
        file: req.file.map(StudyFilePayload::decode).transpose()?,
    };
    let service = state.service.clone();
    let created = tokio::task::spawn_blocking(move || service.create_study(input)).await??;
    Ok((
        StatusCode::CREATED,
        Json(StudyRes::from_record(created, &Local::now())),
    ))
}

#[utoipa::path(
    get,
    path = "/studies/{id}",
    params(("id" = String, Path, description = "Study id")),
    responses(
        (status = 200, description = "The study", body = StudyRes),
        (status = 404, description = "No such study", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn get_study(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StudyRes>, ApiError> {
    let id = parse_id(&id)?;
    let service = state.service.clone();
    let record = tokio::task::spawn_blocking(move || service.get_study(id)).await??;
    Ok(Json(StudyRes::from_record(record, &Local::now())))
}

#[utoipa::path(
    put,
    path = "/studies/{id}",
    params(("id" = String, Path, description = "Study id")),
    request_body = UpdateStudyReq,
    responses(
        (status = 200, description = "Study updated", body = StudyRes),
        (status = 400, description = "Invalid input or non-DICOM file", body = ErrorRes),
        (status = 404, description = "No such study", body = ErrorRes),
        (status = 502, description = "Blob or metadata store failed", body = ErrorRes)
    )
)]
/// Update a study's name and description, optionally replacing its file.
///
/// The study's current file is taken as the one being replaced.
#[axum::debug_handler]
async fn update_study(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStudyReq>,
) -> Result<Json<StudyRes>, ApiError> {
    let id = parse_id(&id)?;
    let replacement = req.file.map(StudyFilePayload::decode).transpose()?;
    let service = state.service.clone();
    let updated = tokio::task::spawn_blocking(move || {
        service.update_study_by_id(id, req.name, req.description, replacement)
    })
    .await??;
    Ok(Json(StudyRes::from_record(updated, &Local::now())))
}

#[utoipa::path(
    delete,
    path = "/studies/{id}",
    params(("id" = String, Path, description = "Study id")),
    responses(
        (status = 204, description = "Study deleted"),
        (status = 404, description = "No such study", body = ErrorRes),
        (status = 502, description = "Blob or metadata store failed", body = ErrorRes)
    )
)]
/// Delete a study and its file.
#[axum::debug_handler]
async fn delete_study(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || service.delete_study_by_id(id)).await??;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/studies/{id}/download",
    params(("id" = String, Path, description = "Study id")),
    responses(
        (status = 200, description = "Public URL and file name of the study's DICOM file", body = DownloadRes),
        (status = 404, description = "No such study", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn download_study(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DownloadRes>, ApiError> {
    let id = parse_id(&id)?;
    let service = state.service.clone();
    let download = tokio::task::spawn_blocking(move || service.download_url(id)).await??;
    Ok(Json(download.into()))
}
