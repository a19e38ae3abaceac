use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::models::{
    EnqueueImageRequest, ExportQuery, NewsletterRequest, PageQuery, QueueQuery, ReviewRequest,
    UpdateSurveyRequest,
};
use crate::service::{self, UserExport};
use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

pub async fn survey_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match service::survey_status(&state, &headers) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn update_survey_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateSurveyRequest>,
) -> impl IntoResponse {
    match service::update_survey_status(&state, &headers, payload) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn survey_type(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    match service::survey_type(&state, &headers) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    match service::users_page(&state, &headers, query) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn export_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> impl IntoResponse {
    match service::export_users(&state, &headers, query) {
        Ok(UserExport::Json(profiles)) => (StatusCode::OK, Json(profiles)).into_response(),
        Ok(UserExport::Csv(csv)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], csv).into_response()
        }
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn delete_user_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match service::delete_user_preview(&state, &headers, &name) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match service::delete_user(&state, &headers, &name) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn flush_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(short_name): Path<String>,
) -> impl IntoResponse {
    match service::flush_preview(&state, &headers, &short_name) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn flush_task_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(short_name): Path<String>,
) -> impl IntoResponse {
    match service::flush_task_runs(&state, &headers, &short_name) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn export_category(
    State(state): State<AppState>,
    Path(category_name): Path<String>,
) -> impl IntoResponse {
    match service::export_category_geojson(&state, &category_name) {
        Ok(collection) => (StatusCode::OK, Json(collection)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn enqueue_image(
    State(state): State<AppState>,
    Json(payload): Json<EnqueueImageRequest>,
) -> impl IntoResponse {
    match service::enqueue_image(&state, payload) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn queued_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QueueQuery>,
) -> impl IntoResponse {
    match service::list_queued_images(&state, &headers, query) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn review_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ReviewRequest>,
) -> impl IntoResponse {
    match service::review_image(&state, &headers, &id, payload) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn send_newsletter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewsletterRequest>,
) -> impl IntoResponse {
    match service::send_newsletter(&state, &headers, payload) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn blog(State(state): State<AppState>) -> impl IntoResponse {
    Json(service::blog_posts(&state))
}
