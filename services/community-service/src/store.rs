use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::{
    BlogPost, Project, ProjectRef, ProjectStats, QueuedImage, RankAndScore, ReviewStatus, Task,
    TaskRun, TaskState, User,
};
use crate::survey::SurveyStatus;

/// Account lookups plus the cached bits that hang off an account.
pub trait UserDirectory: Send + Sync {
    fn by_name(&self, name: &str) -> Option<User>;
    /// Returns one page of accounts plus the total count.
    fn page(&self, page: usize, per_page: usize) -> (Vec<User>, usize);
    fn all(&self) -> Vec<User>;
    fn set_survey_status(&self, user_id: i64, status: SurveyStatus) -> bool;
    fn rank_and_score(&self, user_id: i64) -> RankAndScore;
    fn delete(&self, user_id: i64) -> bool;
    fn purge_summary(&self, user_id: i64);
}

pub trait ProjectDirectory: Send + Sync {
    fn projects_in_category(&self, category: &str, page: usize, per_page: usize)
        -> Vec<ProjectRef>;
    fn by_short_name(&self, short_name: &str) -> Option<Project>;
    fn owned_by(&self, user_id: i64) -> Vec<Project>;
    fn transfer_ownership(&self, project_id: i64, new_owner_id: i64) -> bool;
    fn stats(&self, project_id: i64) -> ProjectStats;
    /// Drops any cached summaries for the project.
    fn invalidate(&self, project_id: i64);
}

pub trait ContributionStore: Send + Sync {
    fn runs_by_user(&self, user_id: i64) -> i64;
    /// Strips account identity off a contributor's runs, keeping the
    /// contributions themselves. Returns how many runs were touched.
    fn anonymize_user_runs(&self, user_id: i64, label: &str) -> usize;
    fn flush_project_runs(&self, project_id: i64) -> usize;
    /// Puts every non-ongoing task of the project back in play.
    fn reopen_tasks(&self, project_id: i64) -> usize;
}

pub trait RecordExporter: Send + Sync {
    /// Serialized records for one project, as chunks that concatenate
    /// into a single JSON array.
    fn stream_records(&self, entity: &str, project_id: i64) -> Vec<String>;
}

pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewError {
    NotFound,
    AlreadyReviewed,
}

pub trait ImageQueue: Send + Sync {
    /// Returns false when the URL digest is already queued.
    fn enqueue(&self, entry: QueuedImage) -> bool;
    fn list(&self, status: ReviewStatus) -> Vec<QueuedImage>;
    fn review(
        &self,
        id: &str,
        status: ReviewStatus,
        reviewer: &str,
    ) -> Result<QueuedImage, ReviewError>;
}

pub trait BlogSource: Send + Sync {
    /// Newest first.
    fn posts(&self) -> Vec<BlogPost>;
}

#[derive(Default)]
struct PlatformData {
    users: BTreeMap<i64, User>,
    projects: BTreeMap<i64, Project>,
    tasks: BTreeMap<i64, Task>,
    task_runs: BTreeMap<i64, TaskRun>,
    purged_summaries: Vec<i64>,
    invalidated_projects: Vec<i64>,
    next_id: i64,
}

/// Single-process implementation of the persistence seams. Everything
/// sits behind one lock so cross-record updates stay consistent.
#[derive(Default)]
pub struct InMemoryPlatform {
    inner: Mutex<PlatformData>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, PlatformData> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(data: &mut PlatformData) -> i64 {
        data.next_id += 1;
        data.next_id
    }

    pub fn add_user(
        &self,
        name: &str,
        full_name: &str,
        email: &str,
        admin: bool,
        newsletter_opt_in: bool,
    ) -> i64 {
        let mut data = self.data();
        let id = Self::next_id(&mut data);
        data.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
                full_name: full_name.to_string(),
                email: email.to_string(),
                admin,
                newsletter_opt_in,
                created: Utc::now(),
                survey_status: None,
            },
        );
        id
    }

    pub fn add_project(&self, short_name: &str, name: &str, owner_id: i64, category: &str) -> i64 {
        let mut data = self.data();
        let id = Self::next_id(&mut data);
        data.projects.insert(
            id,
            Project {
                id,
                short_name: short_name.to_string(),
                name: name.to_string(),
                owner_id,
                category: category.to_string(),
            },
        );
        id
    }

    pub fn add_task(&self, project_id: i64) -> i64 {
        let mut data = self.data();
        let id = Self::next_id(&mut data);
        data.tasks.insert(
            id,
            Task {
                id,
                project_id,
                state: TaskState::Ongoing,
            },
        );
        id
    }

    pub fn complete_task(&self, task_id: i64) {
        if let Some(task) = self.data().tasks.get_mut(&task_id) {
            task.state = TaskState::Completed;
        }
    }

    pub fn add_task_run(
        &self,
        project_id: i64,
        task_id: i64,
        user_id: Option<i64>,
        info: Map<String, Value>,
    ) -> i64 {
        let mut data = self.data();
        let id = Self::next_id(&mut data);
        data.task_runs.insert(
            id,
            TaskRun {
                id,
                project_id,
                task_id,
                user_id,
                user_ip: None,
                created: Utc::now(),
                info,
            },
        );
        id
    }

    /// Seeds a small dataset so a fresh in-memory deployment has
    /// something to browse, flush and export.
    pub fn seed_demo(&self) {
        let leader = self.add_user("leader", "Site Leader", "leader@example.org", true, true);
        let maria = self.add_user("maria", "Maria Reyes", "maria@example.org", false, true);
        let project = self.add_project("volcano_watch", "Volcano Watch", leader, "nature");
        let task = self.add_task(project);
        self.complete_task(task);
        self.add_task(project);

        let mut info = Map::new();
        info.insert(
            "img".to_string(),
            Value::String("https://images.example.org/plume-042.jpg".to_string()),
        );
        info.insert("sight".to_string(), Value::String("ash plume".to_string()));
        info.insert(
            "plume".to_string(),
            serde_json::json!([
                [-13627000.0, 4550000.0],
                [-13626000.0, 4551000.0],
                [-13625000.0, 4550500.0]
            ]),
        );
        self.add_task_run(project, task, Some(maria), info);
    }

    #[cfg(test)]
    pub fn task_run(&self, id: i64) -> Option<TaskRun> {
        self.data().task_runs.get(&id).cloned()
    }

    #[cfg(test)]
    pub fn task(&self, id: i64) -> Option<Task> {
        self.data().tasks.get(&id).cloned()
    }

    #[cfg(test)]
    pub fn project(&self, id: i64) -> Option<Project> {
        self.data().projects.get(&id).cloned()
    }

    #[cfg(test)]
    pub fn purged_summaries(&self) -> Vec<i64> {
        self.data().purged_summaries.clone()
    }

    #[cfg(test)]
    pub fn invalidated_projects(&self) -> Vec<i64> {
        self.data().invalidated_projects.clone()
    }
}

impl UserDirectory for InMemoryPlatform {
    fn by_name(&self, name: &str) -> Option<User> {
        self.data()
            .users
            .values()
            .find(|user| user.name == name)
            .cloned()
    }

    fn page(&self, page: usize, per_page: usize) -> (Vec<User>, usize) {
        let data = self.data();
        let total = data.users.len();
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let users = data
            .users
            .values()
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect();
        (users, total)
    }

    fn all(&self) -> Vec<User> {
        self.data().users.values().cloned().collect()
    }

    fn set_survey_status(&self, user_id: i64, status: SurveyStatus) -> bool {
        match self.data().users.get_mut(&user_id) {
            Some(user) => {
                user.survey_status = Some(status);
                true
            }
            None => false,
        }
    }

    fn rank_and_score(&self, user_id: i64) -> RankAndScore {
        let data = self.data();
        let score_of = |id: i64| {
            data.task_runs
                .values()
                .filter(|run| run.user_id == Some(id))
                .count() as i64
        };
        let score = score_of(user_id);
        let rank = 1 + data
            .users
            .keys()
            .filter(|&&other| other != user_id && score_of(other) > score)
            .count();
        RankAndScore { rank, score }
    }

    fn delete(&self, user_id: i64) -> bool {
        self.data().users.remove(&user_id).is_some()
    }

    fn purge_summary(&self, user_id: i64) {
        self.data().purged_summaries.push(user_id);
    }
}

impl ProjectDirectory for InMemoryPlatform {
    fn projects_in_category(
        &self,
        category: &str,
        page: usize,
        per_page: usize,
    ) -> Vec<ProjectRef> {
        let data = self.data();
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        data.projects
            .values()
            .filter(|project| project.category == category)
            .skip(offset)
            .take(per_page)
            .map(|project| ProjectRef {
                id: project.id,
                short_name: project.short_name.clone(),
            })
            .collect()
    }

    fn by_short_name(&self, short_name: &str) -> Option<Project> {
        self.data()
            .projects
            .values()
            .find(|project| project.short_name == short_name)
            .cloned()
    }

    fn owned_by(&self, user_id: i64) -> Vec<Project> {
        self.data()
            .projects
            .values()
            .filter(|project| project.owner_id == user_id)
            .cloned()
            .collect()
    }

    fn transfer_ownership(&self, project_id: i64, new_owner_id: i64) -> bool {
        match self.data().projects.get_mut(&project_id) {
            Some(project) => {
                project.owner_id = new_owner_id;
                true
            }
            None => false,
        }
    }

    fn stats(&self, project_id: i64) -> ProjectStats {
        let data = self.data();
        let n_tasks = data
            .tasks
            .values()
            .filter(|task| task.project_id == project_id)
            .count();
        let n_completed_tasks = data
            .tasks
            .values()
            .filter(|task| task.project_id == project_id && task.state == TaskState::Completed)
            .count();
        let runs: Vec<&TaskRun> = data
            .task_runs
            .values()
            .filter(|run| run.project_id == project_id)
            .collect();
        let n_volunteers = runs
            .iter()
            .filter_map(|run| run.user_id)
            .collect::<BTreeSet<_>>()
            .len();
        let overall_progress = if n_tasks == 0 {
            0.0
        } else {
            n_completed_tasks as f64 * 100.0 / n_tasks as f64
        };
        let last_activity = runs.iter().map(|run| run.created).max();

        ProjectStats {
            n_tasks,
            n_task_runs: runs.len(),
            n_completed_tasks,
            n_volunteers,
            overall_progress,
            last_activity,
        }
    }

    fn invalidate(&self, project_id: i64) {
        self.data().invalidated_projects.push(project_id);
    }
}

impl ContributionStore for InMemoryPlatform {
    fn runs_by_user(&self, user_id: i64) -> i64 {
        self.data()
            .task_runs
            .values()
            .filter(|run| run.user_id == Some(user_id))
            .count() as i64
    }

    fn anonymize_user_runs(&self, user_id: i64, label: &str) -> usize {
        let mut data = self.data();
        let mut count = 0;
        for run in data.task_runs.values_mut() {
            if run.user_id == Some(user_id) {
                run.user_id = None;
                run.user_ip = Some(label.to_string());
                count += 1;
            }
        }
        count
    }

    fn flush_project_runs(&self, project_id: i64) -> usize {
        let mut data = self.data();
        let before = data.task_runs.len();
        data.task_runs.retain(|_, run| run.project_id != project_id);
        before - data.task_runs.len()
    }

    fn reopen_tasks(&self, project_id: i64) -> usize {
        let mut data = self.data();
        let mut count = 0;
        for task in data.tasks.values_mut() {
            if task.project_id == project_id && task.state != TaskState::Ongoing {
                task.state = TaskState::Ongoing;
                tracing::debug!(task = task.id, "task reopened");
                count += 1;
            }
        }
        count
    }
}

#[derive(Serialize)]
struct ExportedRun<'a> {
    id: i64,
    project_id: i64,
    task_id: i64,
    user_id: Option<i64>,
    user_ip: Option<&'a str>,
    created: DateTime<Utc>,
    info: &'a Map<String, Value>,
}

impl RecordExporter for InMemoryPlatform {
    fn stream_records(&self, entity: &str, project_id: i64) -> Vec<String> {
        if entity != "task_run" {
            return Vec::new();
        }

        let data = self.data();
        let mut chunks = vec!["[".to_string()];
        let mut first = true;
        for run in data
            .task_runs
            .values()
            .filter(|run| run.project_id == project_id)
        {
            if !first {
                chunks.push(",".to_string());
            }
            first = false;
            let record = ExportedRun {
                id: run.id,
                project_id: run.project_id,
                task_id: run.task_id,
                user_id: run.user_id,
                user_ip: run.user_ip.as_deref(),
                created: run.created,
                info: &run.info,
            };
            chunks.push(serde_json::to_string(&record).unwrap_or_else(|_| "null".to_string()));
        }
        chunks.push("]".to_string());
        chunks
    }
}

/// Pending image submissions, keyed by URL digest.
#[derive(Default)]
pub struct InMemoryQueue {
    entries: Mutex<BTreeMap<String, QueuedImage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, QueuedImage>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ImageQueue for InMemoryQueue {
    fn enqueue(&self, entry: QueuedImage) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(&entry.id) {
            return false;
        }
        entries.insert(entry.id.clone(), entry);
        true
    }

    fn list(&self, status: ReviewStatus) -> Vec<QueuedImage> {
        let mut entries: Vec<QueuedImage> = self
            .entries()
            .values()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.submitted_at);
        entries
    }

    fn review(
        &self,
        id: &str,
        status: ReviewStatus,
        reviewer: &str,
    ) -> Result<QueuedImage, ReviewError> {
        let mut entries = self.entries();
        let entry = entries.get_mut(id).ok_or(ReviewError::NotFound)?;
        if entry.status != ReviewStatus::Pending {
            return Err(ReviewError::AlreadyReviewed);
        }
        entry.status = status;
        entry.reviewed_by = Some(reviewer.to_string());
        Ok(entry.clone())
    }
}

/// Default mailer. Writes sends to the log so the service works
/// without a mail relay configured.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, body: &str) {
        tracing::info!(to, subject, body_bytes = body.len(), "newsletter mail queued");
    }
}

#[derive(Default)]
pub struct InMemoryBlog {
    posts: Mutex<Vec<BlogPost>>,
}

impl InMemoryBlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, title: &str, body: &str) -> Uuid {
        self.publish_dated(title, body, Utc::now())
    }

    pub fn publish_dated(&self, title: &str, body: &str, published_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let mut posts = self
            .posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        posts.push(BlogPost {
            id,
            title: title.to_string(),
            body: body.to_string(),
            published_at,
        });
        id
    }
}

impl BlogSource for InMemoryBlog {
    fn posts(&self) -> Vec<BlogPost> {
        let mut posts = self
            .posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        posts
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run_info(img: &str) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("img".to_string(), Value::String(img.to_string()));
        info
    }

    #[test]
    fn anonymize_clears_identity_and_labels_runs() {
        let platform = InMemoryPlatform::new();
        let user = platform.add_user("ines", "Ines", "ines@example.org", false, false);
        let project = platform.add_project("p", "P", user, "nature");
        let task = platform.add_task(project);
        let run = platform.add_task_run(project, task, Some(user), run_info("http://a"));
        let other = platform.add_task_run(project, task, None, run_info("http://b"));

        let touched = platform.anonymize_user_runs(user, "deleted_user_ines");
        assert_eq!(touched, 1);

        let anonymized = platform.task_run(run).unwrap();
        assert_eq!(anonymized.user_id, None);
        assert_eq!(anonymized.user_ip.as_deref(), Some("deleted_user_ines"));

        let untouched = platform.task_run(other).unwrap();
        assert_eq!(untouched.user_ip, None);
    }

    #[test]
    fn flush_removes_runs_and_reopen_resets_tasks() {
        let platform = InMemoryPlatform::new();
        let owner = platform.add_user("owner", "Owner", "o@example.org", false, false);
        let project = platform.add_project("p", "P", owner, "nature");
        let other_project = platform.add_project("q", "Q", owner, "nature");
        let done = platform.add_task(project);
        platform.complete_task(done);
        let open = platform.add_task(project);
        platform.add_task_run(project, done, Some(owner), run_info("http://a"));
        platform.add_task_run(other_project, open, None, run_info("http://b"));

        assert_eq!(platform.flush_project_runs(project), 1);
        assert_eq!(platform.reopen_tasks(project), 1);
        assert_eq!(platform.task(done).unwrap().state, TaskState::Ongoing);

        // The other project keeps its run.
        assert_eq!(platform.flush_project_runs(other_project), 1);
    }

    #[test]
    fn rank_counts_strictly_better_scores() {
        let platform = InMemoryPlatform::new();
        let busy = platform.add_user("busy", "Busy", "b@example.org", false, false);
        let quiet = platform.add_user("quiet", "Quiet", "q@example.org", false, false);
        let project = platform.add_project("p", "P", busy, "nature");
        let task = platform.add_task(project);
        platform.add_task_run(project, task, Some(busy), run_info("http://a"));
        platform.add_task_run(project, task, Some(busy), run_info("http://b"));

        let top = platform.rank_and_score(busy);
        assert_eq!((top.rank, top.score), (1, 2));
        let bottom = platform.rank_and_score(quiet);
        assert_eq!((bottom.rank, bottom.score), (2, 0));
    }

    #[test]
    fn page_slices_and_reports_total() {
        let platform = InMemoryPlatform::new();
        for i in 0..5 {
            platform.add_user(&format!("u{i}"), "U", "u@example.org", false, false);
        }

        let (first, total) = platform.page(1, 2);
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].name, "u0");

        let (last, _) = platform.page(3, 2);
        assert_eq!(last.len(), 1);
        let (beyond, _) = platform.page(4, 2);
        assert!(beyond.is_empty());
    }

    #[test]
    fn streamed_chunks_concatenate_to_a_json_array() {
        let platform = InMemoryPlatform::new();
        let user = platform.add_user("u", "U", "u@example.org", false, false);
        let project = platform.add_project("p", "P", user, "nature");
        let task = platform.add_task(project);
        platform.add_task_run(project, task, Some(user), run_info("http://a"));
        platform.add_task_run(project, task, Some(user), run_info("http://b"));

        let chunks = platform.stream_records("task_run", project);
        assert!(chunks.len() > 2, "expected record and frame chunks");

        let joined = chunks.concat();
        let records: Vec<Value> = serde_json::from_str(&joined).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["project_id"], Value::from(project));
        assert_eq!(records[0]["task_id"], Value::from(task));
        assert_eq!(records[0]["user_id"], Value::from(user));
        assert_eq!(records[0]["info"]["img"], Value::from("http://a"));

        assert!(platform.stream_records("task", project).is_empty());
    }

    #[test]
    fn queue_rejects_duplicates_and_double_review() {
        let queue = InMemoryQueue::new();
        let entry = QueuedImage {
            id: "abc".to_string(),
            url: "https://example.org/1.jpg".to_string(),
            source: "feed".to_string(),
            submitted_by: None,
            submitted_at: Utc::now(),
            status: ReviewStatus::Pending,
            reviewed_by: None,
        };

        assert!(queue.enqueue(entry.clone()));
        assert!(!queue.enqueue(entry));
        assert_eq!(queue.list(ReviewStatus::Pending).len(), 1);

        let reviewed = queue.review("abc", ReviewStatus::Approved, "leader").unwrap();
        assert_eq!(reviewed.status, ReviewStatus::Approved);
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("leader"));
        assert!(queue.list(ReviewStatus::Pending).is_empty());

        assert_eq!(
            queue.review("abc", ReviewStatus::Rejected, "leader"),
            Err(ReviewError::AlreadyReviewed)
        );
        assert_eq!(
            queue.review("missing", ReviewStatus::Approved, "leader"),
            Err(ReviewError::NotFound)
        );
    }

    #[test]
    fn queue_lists_in_submission_order() {
        let queue = InMemoryQueue::new();
        // Ids sort against submission order; time must win.
        assert!(queue.enqueue(QueuedImage {
            id: "ff".to_string(),
            url: "https://example.org/first.jpg".to_string(),
            source: "feed".to_string(),
            submitted_by: None,
            submitted_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            status: ReviewStatus::Pending,
            reviewed_by: None,
        }));
        assert!(queue.enqueue(QueuedImage {
            id: "0a".to_string(),
            url: "https://example.org/second.jpg".to_string(),
            source: "feed".to_string(),
            submitted_by: None,
            submitted_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            status: ReviewStatus::Pending,
            reviewed_by: None,
        }));

        let pending = queue.list(ReviewStatus::Pending);
        assert_eq!(pending[0].url, "https://example.org/first.jpg");
        assert_eq!(pending[1].url, "https://example.org/second.jpg");
    }

    #[test]
    fn blog_returns_newest_first() {
        let blog = InMemoryBlog::new();
        let older = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 2, 20, 9, 0, 0).unwrap();
        blog.publish_dated("first", "body", older);
        blog.publish_dated("second", "body", newer);

        let posts = blog.posts();
        assert_eq!(posts[0].title, "second");
        assert_eq!(posts[1].title, "first");
    }

    #[test]
    fn stats_summarize_project_activity() {
        let platform = InMemoryPlatform::new();
        let a = platform.add_user("a", "A", "a@example.org", false, false);
        let b = platform.add_user("b", "B", "b@example.org", false, false);
        let project = platform.add_project("p", "P", a, "nature");
        let done = platform.add_task(project);
        platform.complete_task(done);
        platform.add_task(project);
        platform.add_task_run(project, done, Some(a), run_info("http://a"));
        platform.add_task_run(project, done, Some(b), run_info("http://b"));
        platform.add_task_run(project, done, Some(a), run_info("http://c"));

        let stats = platform.stats(project);
        assert_eq!(stats.n_tasks, 2);
        assert_eq!(stats.n_completed_tasks, 1);
        assert_eq!(stats.n_task_runs, 3);
        assert_eq!(stats.n_volunteers, 2);
        assert!((stats.overall_progress - 50.0).abs() < f64::EPSILON);
        assert!(stats.last_activity.is_some());
    }
}
