//! The application context: registry, orchestrator and task supervisor,
//! created once and passed to whatever front end drives it.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::claude::ClaudeCliGenerator;
use crate::config::FoundryConfig;
use crate::errors::ProjectError;
use crate::orchestrator::{AiGenerator, GenerationOrchestrator, Scaffolder, TaskTracker};
use crate::registry::{Project, ProjectRegistry, Template};
use crate::scaffold::StaticScaffolder;

pub struct Foundry {
    config: FoundryConfig,
    registry: Arc<ProjectRegistry>,
    orchestrator: Arc<GenerationOrchestrator>,
    tracker: TaskTracker,
}

impl Foundry {
    pub fn new(
        config: FoundryConfig,
        ai: Option<Arc<dyn AiGenerator>>,
        scaffolder: Arc<dyn Scaffolder>,
    ) -> Self {
        let registry = Arc::new(ProjectRegistry::from_config(&config));
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            registry.clone(),
            ai,
            scaffolder,
            &config,
        ));
        Self {
            config,
            registry,
            orchestrator,
            tracker: TaskTracker::new(),
        }
    }

    /// Wire the Claude CLI generator and the static scaffolder.
    pub fn from_config(config: FoundryConfig) -> Self {
        let ai: Arc<dyn AiGenerator> = Arc::new(ClaudeCliGenerator::from_config(&config.ai));
        Self::new(config, Some(ai), Arc::new(StaticScaffolder::new()))
    }

    pub fn config(&self) -> &FoundryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub async fn start(&self) -> Result<()> {
        self.registry.startup().await?;
        info!(
            root = %self.registry.projects_root().display(),
            allowed_commands = ?self.config.sandbox.allowed_commands,
            "Foundry started"
        );
        Ok(())
    }

    /// Create a project and start generating it in the background. The
    /// returned record is the `created` snapshot.
    pub async fn generate(
        &self,
        prompt: &str,
        template: Option<Template>,
    ) -> Result<Arc<Project>, ProjectError> {
        let project = self.registry.create(prompt, template).await?;
        self.registry.start_run(&project.id).await?;
        self.spawn_run(&project.id);
        Ok(project)
    }

    /// Start a new run for an existing project that is not mid-run.
    pub async fn regenerate(&self, project_id: &str) -> Result<Arc<Project>, ProjectError> {
        let project = self.registry.start_run(project_id).await?;
        self.spawn_run(project_id);
        Ok(project)
    }

    fn spawn_run(&self, project_id: &str) {
        let orchestrator = self.orchestrator.clone();
        let id = project_id.to_string();
        self.tracker
            .spawn(format!("project-generation:{}", project_id), move |cancel| async move {
                orchestrator.run(&id, cancel).await;
            });
    }

    /// Stop all runs (marking interrupted projects failed), then drop state.
    pub async fn shutdown(&self) {
        self.tracker.shutdown().await;
        self.registry.shutdown().await;
        info!("Foundry stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::registry::ProjectStatus;
    use std::time::Duration;

    fn foundry(dir: &tempfile::TempDir) -> Foundry {
        let mut config = FoundryConfig::default();
        config.projects.root = dir.path().join("projects");
        Foundry::new(config, None, Arc::new(StaticScaffolder::new()))
    }

    async fn wait_for_terminal(foundry: &Foundry, id: &str) -> ProjectStatus {
        for _ in 0..200 {
            let status = foundry.registry().get(id).await.unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("project {} never reached a terminal status", id);
    }

    #[tokio::test]
    async fn test_generate_runs_in_background_to_ready() {
        let dir = tempfile::tempdir().unwrap();
        let foundry = foundry(&dir);
        foundry.start().await.unwrap();

        let project = foundry.generate("Build a landing page", None).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Created);
        assert_eq!(wait_for_terminal(&foundry, &project.id).await, ProjectStatus::Ready);

        let current = foundry.registry().get(&project.id).await.unwrap();
        assert_eq!(current.preview_path.as_deref(), Some("index.html"));
        foundry.shutdown().await;
    }

    #[tokio::test]
    async fn test_generate_rejects_invalid_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let foundry = foundry(&dir);
        assert!(matches!(
            foundry.generate("", None).await,
            Err(ProjectError::Validation(_))
        ));
        assert_eq!(foundry.tracker().active(), 0);
    }

    #[tokio::test]
    async fn test_regenerate_after_ready() {
        let dir = tempfile::tempdir().unwrap();
        let foundry = foundry(&dir);
        let project = foundry.generate("prompt", None).await.unwrap();
        wait_for_terminal(&foundry, &project.id).await;

        let mut sub = foundry.registry().subscribe(&project.id).await.unwrap();
        foundry.regenerate(&project.id).await.unwrap();

        let mut statuses = Vec::new();
        while statuses.len() < 2 {
            let event = sub.receiver.recv().await.unwrap();
            if event.kind == EventKind::StatusChanged {
                statuses.push(event.payload["status"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(statuses, vec!["running", "ready"]);
        assert!(matches!(
            foundry.regenerate("missing").await,
            Err(ProjectError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_regenerate_while_first_run_is_pending_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let foundry = foundry(&dir);
        let project = foundry.generate("prompt", None).await.unwrap();

        assert!(matches!(
            foundry.regenerate(&project.id).await,
            Err(ProjectError::Validation(_))
        ));
        assert_eq!(wait_for_terminal(&foundry, &project.id).await, ProjectStatus::Ready);

        let history = foundry.registry().bus().history(&project.id);
        let statuses: Vec<_> = history
            .iter()
            .filter(|e| e.kind == EventKind::StatusChanged)
            .map(|e| e.payload["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["running", "ready"]);
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let dir = tempfile::tempdir().unwrap();
        let foundry = foundry(&dir);
        let project = foundry.generate("prompt", None).await.unwrap();
        foundry.shutdown().await;

        assert!(foundry.registry().get(&project.id).await.is_err());
        assert_eq!(foundry.tracker().active(), 0);
    }
}
