use std::sync::Arc;

use crate::schema::SchemaRegistry;
use crate::store::{
    BlogSource, ContributionStore, ImageQueue, Mailer, ProjectDirectory, RecordExporter,
    UserDirectory,
};

#[derive(Clone, Copy)]
pub struct SurveyConfig {
    pub final_survey_task_requirements: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub projects: Arc<dyn ProjectDirectory>,
    pub contributions: Arc<dyn ContributionStore>,
    pub exporter: Arc<dyn RecordExporter>,
    pub schemas: Arc<SchemaRegistry>,
    pub mailer: Arc<dyn Mailer>,
    pub images: Arc<dyn ImageQueue>,
    pub blog: Arc<dyn BlogSource>,
    pub survey: SurveyConfig,
}
