mod app;
mod export;
mod geojson;
mod handlers;
mod mercator;
mod models;
mod schema;
mod service;
mod state;
mod store;
mod survey;

use std::sync::Arc;

use mapcrowd_common::{bind_listener, env_or, init_tracing, shutdown_signal};

use crate::schema::SchemaRegistry;
use crate::state::{AppState, SurveyConfig};
use crate::store::{InMemoryBlog, InMemoryPlatform, InMemoryQueue, LogMailer};

#[tokio::main]
async fn main() {
    let _guards = init_tracing("community-service");

    let port = env_or("PORT", 8080u16);
    let final_survey_task_requirements = env_or("FINAL_SURVEY_TASK_REQUIREMENTS", 30i64);
    let schemas = load_schemas();

    let platform = Arc::new(InMemoryPlatform::new());
    let blog = Arc::new(InMemoryBlog::new());
    if env_or("DEMO_SEED", false) {
        // Gives a fresh deployment something to browse and export.
        platform.seed_demo();
        blog.publish(
            "Welcome to the community",
            "Pick a project, contribute a few answers and watch the map grow.",
        );
    }

    let state = AppState {
        users: platform.clone(),
        projects: platform.clone(),
        contributions: platform.clone(),
        exporter: platform,
        schemas: Arc::new(schemas),
        mailer: Arc::new(LogMailer),
        images: Arc::new(InMemoryQueue::new()),
        blog,
        survey: SurveyConfig {
            final_survey_task_requirements,
        },
    };

    let app = app::build_router(state);
    let listener = bind_listener(port).await;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");
}

fn load_schemas() -> SchemaRegistry {
    let Ok(path) = std::env::var("SCHEMA_CONFIG_PATH") else {
        tracing::warn!("SCHEMA_CONFIG_PATH is not set, geo exports will be empty");
        return SchemaRegistry::empty();
    };
    match SchemaRegistry::from_toml_file(std::path::Path::new(&path)) {
        Ok(registry) => {
            if registry.is_empty() {
                tracing::warn!(path = path.as_str(), "schema config lists no projects");
            } else {
                tracing::info!(
                    path = path.as_str(),
                    projects = registry.len(),
                    "project schemas loaded"
                );
            }
            registry
        }
        Err(err) => {
            tracing::error!(path = path.as_str(), error = %err, "schema config rejected");
            SchemaRegistry::empty()
        }
    }
}
