use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use sha2::{Digest, Sha256};

use mapcrowd_common::pretty_date;

use crate::export::{self, ExportError};
use crate::geojson::FeatureCollection;
use crate::models::{
    BlogListResponse, BlogPostEntry, DeleteUserPreview, DeleteUserResponse, EnqueueImageRequest,
    EnqueueImageResponse, ErrorResponse, ExportQuery, FlushPreview, FlushResponse,
    NewsletterRequest, NewsletterResponse, PageQuery, Project, QueueListResponse, QueueQuery,
    QueuedImage, ReviewRequest, ReviewResponse, ReviewStatus, SurveyStatusResponse,
    SurveyTypeResponse, UpdateSurveyRequest, UpdateSurveyResponse, User, UserListEntry,
    UserProfile, UsersPageResponse,
};
use crate::state::AppState;
use crate::store::ReviewError;
use crate::survey::{select_survey_type, SurveyStatus};

/// The platform gateway authenticates and forwards the account name here.
pub const USER_HEADER: &str = "x-community-user";

const USERS_PER_PAGE: usize = 24;

#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code,
                message: message.into(),
            },
        }
    }
}

fn auth_required() -> ServiceError {
    ServiceError::new(
        StatusCode::UNAUTHORIZED,
        "auth_required",
        "sign in to use this endpoint",
    )
}

fn admin_required() -> ServiceError {
    ServiceError::new(
        StatusCode::FORBIDDEN,
        "admin_required",
        "administrator access required",
    )
}

fn page_not_found() -> ServiceError {
    ServiceError::new(StatusCode::NOT_FOUND, "page_not_found", "no such page")
}

fn current_user(state: &AppState, headers: &HeaderMap) -> Option<User> {
    let name = headers.get(USER_HEADER)?.to_str().ok()?;
    state.users.by_name(name)
}

fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ServiceError> {
    current_user(state, headers).ok_or_else(auth_required)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<User, ServiceError> {
    let user = require_user(state, headers)?;
    if !user.admin {
        return Err(admin_required());
    }
    Ok(user)
}

pub fn survey_status(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<SurveyStatusResponse, ServiceError> {
    let user = require_user(state, headers)?;
    match user.survey_status {
        Some(status) => Ok(SurveyStatusResponse {
            survey_status: status,
            task_runs: Some(state.users.rank_and_score(user.id).score),
            final_survey_task_requirements: Some(state.survey.final_survey_task_requirements),
        }),
        None => Ok(SurveyStatusResponse {
            survey_status: SurveyStatus::ResponseNotTaken,
            task_runs: None,
            final_survey_task_requirements: None,
        }),
    }
}

fn parse_survey_state(
    value: Option<&str>,
    field: &'static str,
) -> Result<SurveyStatus, ServiceError> {
    let raw = value.ok_or_else(|| {
        ServiceError::new(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            format!("{field} state is required"),
        )
    })?;
    raw.parse::<SurveyStatus>().map_err(|_| {
        ServiceError::new(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            format!("{field} state {raw:?} is not a survey state"),
        )
    })
}

pub fn update_survey_status(
    state: &AppState,
    headers: &HeaderMap,
    payload: UpdateSurveyRequest,
) -> Result<UpdateSurveyResponse, ServiceError> {
    let user = require_user(state, headers)?;
    let previous = parse_survey_state(payload.previous.as_deref(), "previous")?;
    let new = parse_survey_state(payload.new.as_deref(), "new")?;

    state.users.set_survey_status(user.id, new);
    tracing::info!(
        user = user.name.as_str(),
        from = previous.as_str(),
        to = new.as_str(),
        "survey status updated"
    );

    Ok(UpdateSurveyResponse {
        status: "ok",
        survey_status: new,
    })
}

pub fn survey_type(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<SurveyTypeResponse, ServiceError> {
    let user = require_user(state, headers)?;
    let requirement = state.survey.final_survey_task_requirements;
    let standing = state.users.rank_and_score(user.id);
    let survey = select_survey_type(user.survey_status, standing.score, requirement);
    tracing::debug!(
        user = user.name.as_str(),
        rank = standing.rank,
        score = standing.score,
        survey = survey.as_str(),
        "survey type selected"
    );

    Ok(SurveyTypeResponse {
        survey_type: survey.as_str(),
        final_survey_task_requirements: requirement,
    })
}

pub fn users_page(
    state: &AppState,
    headers: &HeaderMap,
    query: PageQuery,
) -> Result<UsersPageResponse, ServiceError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(page_not_found());
    }

    let (users, total) = state.users.page(page, USERS_PER_PAGE);
    if users.is_empty() && page != 1 {
        let viewer_is_admin = current_user(state, headers).map(|user| user.admin);
        if viewer_is_admin != Some(true) {
            return Err(page_not_found());
        }
    }

    let entries = users
        .into_iter()
        .map(|user| UserListEntry {
            id: user.id,
            n_task_runs: state.contributions.runs_by_user(user.id),
            registered_ago: pretty_date(user.created),
            name: user.name,
            full_name: user.full_name,
        })
        .collect();

    Ok(UsersPageResponse {
        users: entries,
        total,
        page,
        per_page: USERS_PER_PAGE,
    })
}

fn profile_of(state: &AppState, user: &User) -> UserProfile {
    UserProfile {
        id: user.id,
        name: user.name.clone(),
        full_name: user.full_name.clone(),
        email: user.email.clone(),
        admin: user.admin,
        created: user.created,
        n_task_runs: state.contributions.runs_by_user(user.id),
    }
}

/// Shared guard for the deletion preview and the deletion itself.
fn deletable_target(
    state: &AppState,
    headers: &HeaderMap,
    name: &str,
) -> Result<(User, User), ServiceError> {
    let actor = require_admin(state, headers)?;
    let target = state.users.by_name(name).ok_or_else(|| {
        ServiceError::new(
            StatusCode::NOT_FOUND,
            "user_not_found",
            format!("no user named {name:?}"),
        )
    })?;
    if target.id == actor.id {
        return Err(ServiceError::new(
            StatusCode::BAD_REQUEST,
            "cannot_delete_self",
            "accounts cannot delete themselves",
        ));
    }
    if target.admin {
        return Err(ServiceError::new(
            StatusCode::FORBIDDEN,
            "cannot_delete_admin",
            "administrator accounts cannot be deleted",
        ));
    }
    Ok((actor, target))
}

pub fn delete_user_preview(
    state: &AppState,
    headers: &HeaderMap,
    name: &str,
) -> Result<DeleteUserPreview, ServiceError> {
    let (_actor, target) = deletable_target(state, headers, name)?;
    Ok(DeleteUserPreview {
        target: profile_of(state, &target),
        owned_projects: state.projects.owned_by(target.id),
    })
}

pub fn delete_user(
    state: &AppState,
    headers: &HeaderMap,
    name: &str,
) -> Result<DeleteUserResponse, ServiceError> {
    let (actor, target) = deletable_target(state, headers, name)?;

    // Contributions stay, identity goes.
    let label = format!("deleted_user_{}", target.name);
    let anonymized = state.contributions.anonymize_user_runs(target.id, &label);

    let owned = state.projects.owned_by(target.id);
    for project in &owned {
        state.projects.transfer_ownership(project.id, actor.id);
        state.projects.invalidate(project.id);
    }

    state.users.delete(target.id);
    state.users.purge_summary(target.id);
    state.users.purge_summary(actor.id);

    tracing::info!(
        target = target.name.as_str(),
        actor = actor.name.as_str(),
        anonymized_task_runs = anonymized,
        transferred_projects = owned.len(),
        "user account deleted"
    );

    Ok(DeleteUserResponse {
        status: "ok",
        anonymized_task_runs: anonymized,
        transferred_projects: owned.len(),
    })
}

/// Flushing is open to the project owner as well as administrators.
fn flushable_project(
    state: &AppState,
    headers: &HeaderMap,
    short_name: &str,
) -> Result<(User, Project), ServiceError> {
    let actor = require_user(state, headers)?;
    let project = state.projects.by_short_name(short_name).ok_or_else(|| {
        ServiceError::new(
            StatusCode::NOT_FOUND,
            "project_not_found",
            format!("no project named {short_name:?}"),
        )
    })?;
    if !actor.admin && project.owner_id != actor.id {
        return Err(ServiceError::new(
            StatusCode::FORBIDDEN,
            "owner_required",
            "only the project owner or an administrator can flush task runs",
        ));
    }
    Ok((actor, project))
}

pub fn flush_preview(
    state: &AppState,
    headers: &HeaderMap,
    short_name: &str,
) -> Result<FlushPreview, ServiceError> {
    let (_actor, project) = flushable_project(state, headers, short_name)?;
    let stats = state.projects.stats(project.id);

    Ok(FlushPreview {
        project,
        n_tasks: stats.n_tasks,
        n_task_runs: stats.n_task_runs,
        n_completed_tasks: stats.n_completed_tasks,
        n_volunteers: stats.n_volunteers,
        overall_progress: stats.overall_progress,
        last_activity: stats.last_activity.map(pretty_date),
    })
}

pub fn flush_task_runs(
    state: &AppState,
    headers: &HeaderMap,
    short_name: &str,
) -> Result<FlushResponse, ServiceError> {
    let (actor, project) = flushable_project(state, headers, short_name)?;

    let deleted = state.contributions.flush_project_runs(project.id);
    let reopened = state.contributions.reopen_tasks(project.id);
    state.projects.invalidate(project.id);

    tracing::info!(
        project = project.short_name.as_str(),
        actor = actor.name.as_str(),
        deleted_task_runs = deleted,
        reopened_tasks = reopened,
        "task runs flushed"
    );

    Ok(FlushResponse {
        status: "ok",
        deleted_task_runs: deleted,
        reopened_tasks: reopened,
    })
}

#[derive(Debug)]
pub enum UserExport {
    Json(Vec<UserProfile>),
    Csv(String),
}

pub fn export_users(
    state: &AppState,
    headers: &HeaderMap,
    query: ExportQuery,
) -> Result<UserExport, ServiceError> {
    require_admin(state, headers)?;

    let mut users = state.users.all();
    users.sort_by_key(|user| user.id);
    let profiles: Vec<UserProfile> = users.iter().map(|user| profile_of(state, user)).collect();

    match query.format.as_deref().unwrap_or("json") {
        "json" => Ok(UserExport::Json(profiles)),
        "csv" => Ok(UserExport::Csv(users_to_csv(&profiles))),
        other => Err(ServiceError::new(
            StatusCode::BAD_REQUEST,
            "invalid_format",
            format!("format {other:?} is not supported, use json or csv"),
        )),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn users_to_csv(profiles: &[UserProfile]) -> String {
    let mut out = String::from("id,name,full_name,email,admin,created,n_task_runs\n");
    for profile in profiles {
        let row = [
            profile.id.to_string(),
            csv_field(&profile.name),
            csv_field(&profile.full_name),
            csv_field(&profile.email),
            profile.admin.to_string(),
            profile.created.to_rfc3339(),
            profile.n_task_runs.to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn digest_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn enqueue_image(
    state: &AppState,
    payload: EnqueueImageRequest,
) -> Result<EnqueueImageResponse, ServiceError> {
    let url = payload.url.unwrap_or_default().trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ServiceError::new(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            format!("image url {url:?} must be absolute http(s)"),
        ));
    }

    let id = digest_url(&url);
    let entry = QueuedImage {
        id: id.clone(),
        url,
        source: payload.source.unwrap_or_else(|| "unknown".to_string()),
        submitted_by: payload.submitted_by,
        submitted_at: Utc::now(),
        status: ReviewStatus::Pending,
        reviewed_by: None,
    };

    let inserted = state.images.enqueue(entry);
    if !inserted {
        tracing::debug!(id = id.as_str(), "image already queued");
    }

    Ok(EnqueueImageResponse {
        status: "ok",
        id,
        duplicate: !inserted,
    })
}

pub fn list_queued_images(
    state: &AppState,
    headers: &HeaderMap,
    query: QueueQuery,
) -> Result<QueueListResponse, ServiceError> {
    require_admin(state, headers)?;

    let status = match query.status.as_deref() {
        None => ReviewStatus::Pending,
        Some(raw) => raw.parse::<ReviewStatus>().map_err(|_| {
            ServiceError::new(
                StatusCode::BAD_REQUEST,
                "invalid_status",
                format!("status {raw:?} is not pending, approved or rejected"),
            )
        })?,
    };

    Ok(QueueListResponse {
        images: state.images.list(status),
    })
}

pub fn review_image(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    payload: ReviewRequest,
) -> Result<ReviewResponse, ServiceError> {
    let actor = require_admin(state, headers)?;
    let approve = payload.approve.ok_or_else(|| {
        ServiceError::new(
            StatusCode::BAD_REQUEST,
            "invalid_review",
            "approve flag is required",
        )
    })?;
    let status = if approve {
        ReviewStatus::Approved
    } else {
        ReviewStatus::Rejected
    };

    match state.images.review(id, status, &actor.name) {
        Ok(image) => {
            tracing::info!(
                id,
                reviewer = actor.name.as_str(),
                status = status.as_str(),
                "queued image reviewed"
            );
            Ok(ReviewResponse {
                status: "ok",
                image,
            })
        }
        Err(ReviewError::NotFound) => Err(ServiceError::new(
            StatusCode::NOT_FOUND,
            "entry_not_found",
            format!("no queued image {id:?}"),
        )),
        Err(ReviewError::AlreadyReviewed) => Err(ServiceError::new(
            StatusCode::CONFLICT,
            "already_reviewed",
            "entry already left the pending queue",
        )),
    }
}

pub fn send_newsletter(
    state: &AppState,
    headers: &HeaderMap,
    payload: NewsletterRequest,
) -> Result<NewsletterResponse, ServiceError> {
    let actor = require_admin(state, headers)?;

    let subject = payload.subject.unwrap_or_default().trim().to_string();
    let body = payload.body.unwrap_or_default().trim().to_string();
    if subject.is_empty() || body.is_empty() {
        return Err(ServiceError::new(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "newsletter subject and body are required",
        ));
    }

    let recipients: Vec<User> = state
        .users
        .all()
        .into_iter()
        .filter(|user| user.newsletter_opt_in)
        .collect();
    for user in &recipients {
        state.mailer.send(&user.email, &subject, &body);
    }

    tracing::info!(
        sender = actor.name.as_str(),
        recipients = recipients.len(),
        subject = subject.as_str(),
        "newsletter sent"
    );

    Ok(NewsletterResponse {
        status: "ok",
        recipients: recipients.len(),
    })
}

pub fn blog_posts(state: &AppState) -> BlogListResponse {
    let posts = state
        .blog
        .posts()
        .into_iter()
        .map(|post| BlogPostEntry {
            id: post.id,
            published_ago: pretty_date(post.published_at),
            published_at: post.published_at,
            title: post.title,
            body: post.body,
        })
        .collect();
    BlogListResponse { posts }
}

pub fn export_category_geojson(
    state: &AppState,
    category: &str,
) -> Result<FeatureCollection, ServiceError> {
    export::export_category(
        state.projects.as_ref(),
        state.exporter.as_ref(),
        &state.schemas,
        category,
    )
    .map_err(|err: ExportError| {
        tracing::error!(category, error = %err, "geo export failed");
        ServiceError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "export_failed",
            err.to_string(),
        )
    })
}
