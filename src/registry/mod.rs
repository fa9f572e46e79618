//! Project registry: the single owner of project records.
//!
//! Records live in a map guarded by a `tokio::sync::Mutex` and are stored as
//! `Arc<Project>`, so readers hold a consistent snapshot without locking.
//! Every mutation builds a new record and swaps it in, then publishes the
//! matching event on the [`EventBus`]. The map lock is released before
//! publishing; the bus serializes delivery on its own lock.

mod models;

pub use models::{
    GENERATION_DIR, MAX_PROMPT_CHARS, Project, ProjectStatus, Template, validate_prompt,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::FoundryConfig;
use crate::errors::ProjectError;
use crate::events::{EventBus, EventKind, ProjectEvent, Subscription};
use crate::sandbox::FileEntry;
use crate::sandbox::files::walk_entries;

pub struct ProjectRegistry {
    root: PathBuf,
    api_prefix: String,
    excluded_dirs: Vec<String>,
    projects: Mutex<HashMap<String, Arc<Project>>>,
    bus: EventBus,
}

impl ProjectRegistry {
    pub fn new(root: impl Into<PathBuf>, bus: EventBus) -> Self {
        Self {
            root: root.into(),
            api_prefix: "/api".to_string(),
            excluded_dirs: crate::config::ProjectsSection::default().excluded_dirs,
            projects: Mutex::new(HashMap::new()),
            bus,
        }
    }

    pub fn from_config(config: &FoundryConfig) -> Self {
        let bus = EventBus::new(
            config.projects.history_limit,
            config.projects.subscriber_capacity,
        );
        Self::new(config.projects.root.clone(), bus)
            .with_api_prefix(config.server.api_prefix.clone())
            .with_excluded_dirs(config.projects.excluded_dirs.clone())
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn with_excluded_dirs(mut self, dirs: Vec<String>) -> Self {
        self.excluded_dirs = dirs;
        self
    }

    pub fn projects_root(&self) -> &Path {
        &self.root
    }

    pub fn excluded_dirs(&self) -> &[String] {
        &self.excluded_dirs
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Client-facing locator of the project's preview, if one is resolved.
    pub fn preview_url(&self, project: &Project) -> Option<String> {
        project.preview_path.as_ref().map(|path| {
            format!(
                "{}/projects/{}/preview/{}",
                self.api_prefix.trim_end_matches('/'),
                project.id,
                path.trim_start_matches('/')
            )
        })
    }

    /// Create the projects root.
    pub async fn startup(&self) -> Result<(), ProjectError> {
        create_dir_all(self.root.clone()).await?;
        info!(root = %self.root.display(), "Project registry started");
        Ok(())
    }

    /// Drop every record and all bus state. Open subscriptions end.
    pub async fn shutdown(&self) {
        let count = {
            let mut projects = self.projects.lock().await;
            let count = projects.len();
            projects.clear();
            count
        };
        self.bus.clear();
        info!(projects = count, "Project registry cleared");
    }

    pub async fn create(
        &self,
        prompt: &str,
        template: Option<Template>,
    ) -> Result<Arc<Project>, ProjectError> {
        validate_prompt(prompt)?;

        let id = Uuid::new_v4().simple().to_string();
        let project_dir = self.root.join(&id);
        create_dir_all(models::generation_root(&project_dir)).await?;

        let now = Utc::now();
        let project = Arc::new(Project {
            id: id.clone(),
            prompt: prompt.to_string(),
            template,
            status: ProjectStatus::Created,
            preview_path: None,
            project_dir,
            created_at: now,
            updated_at: now,
        });
        self.projects.lock().await.insert(id.clone(), project.clone());

        info!(project_id = %id, template = ?template, "Project created");
        self.bus.publish(
            ProjectEvent::new(&id, EventKind::Created, "Project created").with_payload(json!({
                "status": ProjectStatus::Created,
                "template": template,
            })),
        );
        Ok(project)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Project>, ProjectError> {
        self.projects
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProjectError::not_found(id))
    }

    /// Replace the record with one built by `update`.
    async fn replace<F>(&self, id: &str, update: F) -> Result<Arc<Project>, ProjectError>
    where
        F: FnOnce(&mut Project),
    {
        let mut projects = self.projects.lock().await;
        let current = projects.get(id).ok_or_else(|| ProjectError::not_found(id))?;
        let mut next = current.touched();
        update(&mut next);
        let next = Arc::new(next);
        projects.insert(id.to_string(), next.clone());
        Ok(next)
    }

    /// Set the status and publish `status_changed`, even when unchanged.
    pub async fn update_status(
        &self,
        id: &str,
        status: ProjectStatus,
    ) -> Result<Arc<Project>, ProjectError> {
        let project = self.replace(id, |p| p.status = status).await?;
        self.publish_status(id, status);
        Ok(project)
    }

    /// Claim the project for a new generation run by moving it to
    /// `running`. Fails with `Validation` when a run already owns it. The
    /// check and the transition happen under one lock, so at most one of
    /// any number of concurrent callers succeeds.
    pub async fn start_run(&self, id: &str) -> Result<Arc<Project>, ProjectError> {
        let project = {
            let mut projects = self.projects.lock().await;
            let current = projects.get(id).ok_or_else(|| ProjectError::not_found(id))?;
            if current.status == ProjectStatus::Running {
                return Err(ProjectError::Validation(format!(
                    "project '{}' is already running",
                    id
                )));
            }
            let mut next = current.touched();
            next.status = ProjectStatus::Running;
            let next = Arc::new(next);
            projects.insert(id.to_string(), next.clone());
            next
        };
        self.publish_status(id, ProjectStatus::Running);
        Ok(project)
    }

    fn publish_status(&self, id: &str, status: ProjectStatus) {
        info!(project_id = %id, status = %status, "Project status changed");
        self.bus.publish(
            ProjectEvent::new(id, EventKind::StatusChanged, format!("Status changed to {}", status))
                .with_payload(json!({ "status": status })),
        );
    }

    /// Record the preview path and publish `preview_ready`.
    pub async fn set_preview(
        &self,
        id: &str,
        preview_path: &str,
    ) -> Result<Arc<Project>, ProjectError> {
        let path = preview_path.to_string();
        let project = self.replace(id, |p| p.preview_path = Some(path)).await?;
        let url = self.preview_url(&project);
        info!(project_id = %id, preview_path = %preview_path, "Preview ready");
        self.bus.publish(
            ProjectEvent::new(id, EventKind::PreviewReady, "Preview available").with_payload(
                json!({
                    "preview_path": preview_path,
                    "preview_url": url,
                }),
            ),
        );
        Ok(project)
    }

    /// Publish a `log` event. The record itself is not touched.
    pub async fn append_log(&self, id: &str, message: &str) -> Result<(), ProjectError> {
        self.ensure_exists(id).await?;
        debug!(project_id = %id, message = %message, "Project log");
        self.bus
            .publish(ProjectEvent::new(id, EventKind::Log, message));
        Ok(())
    }

    /// Publish an `error` event carrying `detail`.
    pub async fn publish_error(
        &self,
        id: &str,
        message: &str,
        detail: &str,
    ) -> Result<(), ProjectError> {
        self.ensure_exists(id).await?;
        self.bus.publish(
            ProjectEvent::new(id, EventKind::Error, message)
                .with_payload(json!({ "detail": detail })),
        );
        Ok(())
    }

    /// Files under the generation root, skipping dependency caches.
    pub async fn list_files(&self, id: &str) -> Result<Vec<FileEntry>, ProjectError> {
        let root = self.get(id).await?.generation_root();
        let excluded = self.excluded_dirs.clone();
        tokio::task::spawn_blocking(move || {
            if !root.is_dir() {
                return Ok(Vec::new());
            }
            walk_entries(&root, &root, &excluded).map_err(|source| ProjectError::Io {
                path: root.clone(),
                source,
            })
        })
        .await
        .map_err(|e| ProjectError::Other(e.into()))?
    }

    pub async fn subscribe(&self, id: &str) -> Result<Subscription, ProjectError> {
        self.ensure_exists(id).await?;
        self.bus.subscribe(id)
    }

    pub fn unsubscribe(&self, id: &str, subscriber_id: u64) {
        self.bus.unsubscribe(id, subscriber_id);
    }

    async fn ensure_exists(&self, id: &str) -> Result<(), ProjectError> {
        if self.projects.lock().await.contains_key(id) {
            Ok(())
        } else {
            Err(ProjectError::not_found(id))
        }
    }
}

async fn create_dir_all(path: PathBuf) -> Result<(), ProjectError> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&path).map_err(|source| ProjectError::Io { path, source })
    })
    .await
    .map_err(|e| ProjectError::Other(e.into()))?
}
