use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::survey::SurveyStatus;

#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub admin: bool,
    pub newsletter_opt_in: bool,
    pub created: DateTime<Utc>,
    /// None until the contributor answers a consent survey.
    pub survey_status: Option<SurveyStatus>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Project {
    pub id: i64,
    pub short_name: String,
    pub name: String,
    pub owner_id: i64,
    pub category: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Ongoing,
    Completed,
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub state: TaskState,
}

#[derive(Clone, Debug)]
pub struct TaskRun {
    pub id: i64,
    pub project_id: i64,
    pub task_id: i64,
    /// Cleared when the contributor account is deleted.
    pub user_id: Option<i64>,
    pub user_ip: Option<String>,
    pub created: DateTime<Utc>,
    pub info: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectRef {
    pub id: i64,
    pub short_name: String,
}

#[derive(Clone, Copy, Debug)]
pub struct RankAndScore {
    pub rank: usize,
    pub score: i64,
}

#[derive(Clone, Debug, Default)]
pub struct ProjectStats {
    pub n_tasks: usize,
    pub n_task_runs: usize,
    pub n_completed_tasks: usize,
    pub n_volunteers: usize,
    pub overall_progress: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueuedImage {
    pub id: String,
    pub url: String,
    pub source: String,
    pub submitted_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BlogPost {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SurveyStatusResponse {
    pub survey_status: SurveyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_runs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_survey_task_requirements: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateSurveyRequest {
    pub previous: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateSurveyResponse {
    pub status: &'static str,
    pub survey_status: SurveyStatus,
}

#[derive(Serialize)]
pub struct SurveyTypeResponse {
    pub survey_type: &'static str,
    pub final_survey_task_requirements: i64,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UserListEntry {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub registered_ago: String,
    pub n_task_runs: i64,
}

#[derive(Debug, Serialize)]
pub struct UsersPageResponse {
    pub users: Vec<UserListEntry>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub admin: bool,
    pub created: DateTime<Utc>,
    pub n_task_runs: i64,
}

#[derive(Serialize)]
pub struct DeleteUserPreview {
    pub target: UserProfile,
    pub owned_projects: Vec<Project>,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub status: &'static str,
    pub anonymized_task_runs: usize,
    pub transferred_projects: usize,
}

#[derive(Serialize)]
pub struct FlushPreview {
    pub project: Project,
    pub n_tasks: usize,
    pub n_task_runs: usize,
    pub n_completed_tasks: usize,
    pub n_volunteers: usize,
    pub overall_progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub status: &'static str,
    pub deleted_task_runs: usize,
    pub reopened_tasks: usize,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Deserialize)]
pub struct EnqueueImageRequest {
    pub url: Option<String>,
    pub source: Option<String>,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueImageResponse {
    pub status: &'static str,
    pub id: String,
    pub duplicate: bool,
}

#[derive(Deserialize)]
pub struct QueueQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct QueueListResponse {
    pub images: Vec<QueuedImage>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub approve: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub status: &'static str,
    pub image: QueuedImage,
}

#[derive(Deserialize)]
pub struct NewsletterRequest {
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NewsletterResponse {
    pub status: &'static str,
    pub recipients: usize,
}

#[derive(Serialize)]
pub struct BlogPostEntry {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub published_ago: String,
}

#[derive(Serialize)]
pub struct BlogListResponse {
    pub posts: Vec<BlogPostEntry>,
}
