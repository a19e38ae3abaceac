use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    blog, delete_user, delete_user_preview, enqueue_image, export_category, export_users,
    flush_preview, flush_task_runs, healthz, queued_images, readyz, review_image, send_newsletter,
    survey_status, survey_type, update_survey_status, users,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/survey/status", get(survey_status))
        .route("/survey/status", post(update_survey_status))
        .route("/survey/type", get(survey_type))
        .route("/users", get(users))
        .route("/users/export", get(export_users))
        .route("/users/:name/delete", get(delete_user_preview))
        .route("/users/:name/delete", post(delete_user))
        .route("/projects/:short_name/flush", get(flush_preview))
        .route("/projects/:short_name/flush", post(flush_task_runs))
        .route("/export/category/:category_name/GeoJSON", get(export_category))
        .route("/sourcerer/images", post(enqueue_image))
        .route("/sourcerer/images", get(queued_images))
        .route("/sourcerer/images/:id/review", post(review_image))
        .route("/newsletter/send", post(send_newsletter))
        .route("/blog", get(blog))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
