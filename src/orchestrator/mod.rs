//! Generation orchestration.
//!
//! A run moves a project `created|ready|failed → running → ready|failed`.
//! The first transition is the caller's claim; the run then:
//!
//! 1. try the AI generator when one is configured and available;
//! 2. otherwise (or on any AI error) run the fallback scaffolder, whose
//!    failure fails the run;
//! 3. locate the manifest, install and build through the command sandbox;
//! 4. resolve the preview and finish in `ready`.
//!
//! Everything after step 2 is best-effort. Errors and panics that escape a
//! run are caught at the task boundary and turn a non-terminal project into
//! `failed`.

mod build;
mod collaborators;
mod tracker;

pub use build::BUILD_ARTIFACT;
pub use collaborators::{AiGenerator, GenerationOutcome, GenerationRequest, LogEmitter, Scaffolder};
pub use tracker::{DEFAULT_SHUTDOWN_GRACE, TaskTracker};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{BuildSection, FoundryConfig};
use crate::errors::CollaboratorError;
use crate::registry::{Project, ProjectRegistry, ProjectStatus};
use crate::tools::ToolBox;

pub struct GenerationOrchestrator {
    registry: Arc<ProjectRegistry>,
    ai: Option<Arc<dyn AiGenerator>>,
    scaffolder: Arc<dyn Scaffolder>,
    allowed_commands: Vec<String>,
    command_timeout: Duration,
    build: BuildSection,
}

impl GenerationOrchestrator {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        ai: Option<Arc<dyn AiGenerator>>,
        scaffolder: Arc<dyn Scaffolder>,
        config: &FoundryConfig,
    ) -> Self {
        Self {
            registry,
            ai,
            scaffolder,
            allowed_commands: config.sandbox.allowed_commands.clone(),
            command_timeout: config.default_command_timeout(),
            build: config.build.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    /// Execute one generation run for `project_id` to completion.
    ///
    /// The project must already be claimed with
    /// [`ProjectRegistry::start_run`]; anything else is left untouched.
    /// Never returns an error: every failure ends up as an `error` event and
    /// the `failed` status.
    pub async fn run(&self, project_id: &str, cancel: CancellationToken) {
        match self.registry.get(project_id).await {
            Ok(project) if project.status == ProjectStatus::Running => {}
            Ok(project) => {
                warn!(project_id = %project_id, status = %project.status, "Refusing to run an unclaimed project");
                return;
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Cannot run generation");
                return;
            }
        }
        let logs = LogEmitter::new(self.registry.clone(), project_id);

        let result = tokio::select! {
            result = std::panic::AssertUnwindSafe(self.execute(project_id, &cancel, &logs)).catch_unwind() => result,
            _ = cancel.cancelled() => Ok(Err(anyhow::anyhow!("Generation cancelled"))),
        };

        let detail = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => format!("Generation task panicked: {}", panic_message(&panic)),
        };
        self.fail_unless_terminal(project_id, &detail, &logs).await;
    }

    async fn execute(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
        logs: &LogEmitter,
    ) -> Result<()> {
        let project = self.registry.get(project_id).await?;
        logs.emit("Starting project generation...").await;

        let root = project.generation_root();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;

        let tools = ToolBox::new(&root, self.allowed_commands.iter().cloned())
            .with_command_timeout(self.command_timeout);

        let outcome = match self.generate_primary(&project, &tools, cancel, logs).await {
            Some(outcome) => outcome,
            None => match self.generate_fallback(&project, logs).await? {
                Some(outcome) => outcome,
                None => return Ok(()),
            },
        };

        let preview = self
            .post_process(&root, &tools, outcome.preview_path.as_deref(), cancel, logs)
            .await?;

        match preview {
            Some(path) => {
                self.registry.set_preview(project_id, &path).await?;
            }
            None => logs.emit("No preview artifact was found.").await,
        }
        self.registry
            .update_status(project_id, ProjectStatus::Ready)
            .await?;
        logs.emit("Project ready.").await;
        info!(project_id = %project_id, "Generation finished");
        Ok(())
    }

    /// AI path. `None` means the fallback should run; the reason has already
    /// been logged.
    async fn generate_primary(
        &self,
        project: &Project,
        tools: &ToolBox,
        cancel: &CancellationToken,
        logs: &LogEmitter,
    ) -> Option<GenerationOutcome> {
        let Some(ai) = self.ai.as_ref().filter(|ai| ai.is_available()) else {
            logs.emit("AI generator unavailable or not configured.").await;
            return None;
        };

        logs.emit("Invoking AI generator...").await;
        let request = GenerationRequest {
            project_id: project.id.clone(),
            prompt: project.prompt.clone(),
            template: project.template,
            root: tools.files().root().to_path_buf(),
            tools: tools.clone(),
            cancel: cancel.clone(),
        };

        let result = std::panic::AssertUnwindSafe(ai.generate(&request, logs))
            .catch_unwind()
            .await;
        let result = match result {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                warn!(project_id = %project.id, panic = %message, "AI generator panicked, falling back");
                logs.emit(format!("AI generation error: generator panicked: {}", message))
                    .await;
                return None;
            }
        };

        match result {
            Ok(outcome) => {
                logs.emit("AI generation finished.").await;
                Some(outcome)
            }
            Err(CollaboratorError::Unavailable(reason)) => {
                warn!(project_id = %project.id, reason = %reason, "AI generator unavailable, falling back");
                logs.emit(format!("AI generator unavailable: {}", reason)).await;
                None
            }
            Err(CollaboratorError::Failed(e)) => {
                warn!(project_id = %project.id, error = %e, "AI generation failed, falling back");
                logs.emit(format!("AI generation error: {:#}", e)).await;
                None
            }
        }
    }

    /// Fallback path. `Ok(None)` means the scaffolder failed and the project
    /// has already been moved to `failed`.
    async fn generate_fallback(
        &self,
        project: &Project,
        logs: &LogEmitter,
    ) -> Result<Option<GenerationOutcome>> {
        logs.emit("Falling back to local scaffold generator...").await;
        let root = project.generation_root();

        match self.scaffolder.generate(&root, &project.prompt).await {
            Ok(outcome) => {
                logs.emit("Fallback generation completed.").await;
                Ok(Some(outcome))
            }
            Err(e) => {
                let detail = format!("{:#}", e);
                error!(project_id = %project.id, error = %detail, "Fallback generation failed");
                self.registry
                    .publish_error(&project.id, "Fallback generation failed", &detail)
                    .await?;
                logs.emit(format!("Fallback generator failed: {}", detail)).await;
                self.registry
                    .update_status(&project.id, ProjectStatus::Failed)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Install, build and resolve the preview path.
    async fn post_process(
        &self,
        root: &Path,
        tools: &ToolBox,
        collaborator_preview: Option<&str>,
        cancel: &CancellationToken,
        logs: &LogEmitter,
    ) -> Result<Option<String>> {
        let scan_root: PathBuf = root.to_path_buf();
        let manifest = self.build.manifest.clone();
        let excluded = self.registry.excluded_dirs().to_vec();
        let (has_output, manifest_dir) = tokio::task::spawn_blocking(move || {
            if !build::has_output(&scan_root) {
                return (false, None);
            }
            let dir = build::find_manifest_dir(&scan_root, &manifest, &excluded);
            (true, dir)
        })
        .await?;

        if !has_output {
            logs.emit("Generation produced no files; skipping build.").await;
            return Ok(None);
        }

        let paths = tools.files().paths();
        match manifest_dir {
            Some(dir) => {
                if dir.is_empty() {
                    logs.emit(format!("Found {} at the project root.", self.build.manifest))
                        .await;
                } else {
                    logs.emit(format!("Found {} in `{}/`.", self.build.manifest, dir))
                        .await;
                }
                build::run_build_steps(tools.commands(), &dir, &self.build, cancel, logs).await?;

                let artifact = build::artifact_path(&dir);
                if build::preview_exists(paths, &artifact) {
                    return Ok(Some(artifact));
                }
                logs.emit(format!("Build did not produce {}.", artifact)).await;
            }
            None => {
                logs.emit(format!("No {} found; skipping build.", self.build.manifest))
                    .await;
            }
        }

        Ok(collaborator_preview
            .map(|p| p.trim_start_matches('/'))
            .filter(|p| !p.is_empty() && build::preview_exists(paths, p))
            .map(str::to_string))
    }

    /// Task-boundary guard: record the failure and move the project to
    /// `failed` unless the run already reached a terminal status.
    async fn fail_unless_terminal(&self, project_id: &str, detail: &str, logs: &LogEmitter) {
        let project = match self.registry.get(project_id).await {
            Ok(project) => project,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, detail = %detail, "Generation ended for a project that no longer exists");
                return;
            }
        };
        if project.status.is_terminal() {
            warn!(project_id = %project_id, status = %project.status, detail = %detail, "Generation error after terminal status");
            return;
        }

        error!(project_id = %project_id, detail = %detail, "Generation failed");
        if let Err(e) = self
            .registry
            .publish_error(project_id, "Generation failed", detail)
            .await
        {
            warn!(project_id = %project_id, error = %e, "Failed to publish error event");
        }
        logs.emit(format!("Generation failed: {}", detail)).await;
        if let Err(e) = self
            .registry
            .update_status(project_id, ProjectStatus::Failed)
            .await
        {
            warn!(project_id = %project_id, error = %e, "Failed to mark project failed");
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
