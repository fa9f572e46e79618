use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::CollaboratorError;
use crate::registry::{ProjectRegistry, Template};
use crate::tools::ToolBox;

/// Everything a generator gets to work with for one run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub project_id: String,
    pub prompt: String,
    pub template: Option<Template>,
    /// Generation root; all output goes here
    pub root: PathBuf,
    /// Sandboxed operations bound to `root`
    pub tools: ToolBox,
    /// Fires when the run is being torn down
    pub cancel: CancellationToken,
}

/// What a generator reports back after writing its tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Entry file relative to the generation root, if the generator knows one
    pub preview_path: Option<String>,
}

impl GenerationOutcome {
    pub fn with_preview(path: impl Into<String>) -> Self {
        Self {
            preview_path: Some(path.into()),
        }
    }
}

/// Primary, AI-backed generator.
///
/// Any error routes the run to the fallback [`Scaffolder`].
#[async_trait]
pub trait AiGenerator: Send + Sync {
    fn is_available(&self) -> bool;

    async fn generate(
        &self,
        request: &GenerationRequest,
        logs: &LogEmitter,
    ) -> Result<GenerationOutcome, CollaboratorError>;
}

/// Deterministic local generator used when the AI path is unavailable or
/// fails. Its failure fails the run.
#[async_trait]
pub trait Scaffolder: Send + Sync {
    async fn generate(&self, root: &Path, prompt: &str) -> Result<GenerationOutcome>;
}

/// Forwards progress lines into a project's event stream as `log` events.
#[derive(Clone)]
pub struct LogEmitter {
    registry: Arc<ProjectRegistry>,
    project_id: String,
}

impl LogEmitter {
    pub fn new(registry: Arc<ProjectRegistry>, project_id: impl Into<String>) -> Self {
        Self {
            registry,
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Publish one log line. A project that vanished mid-run (registry
    /// shutdown) only drops the line.
    pub async fn emit(&self, message: impl AsRef<str>) {
        if let Err(e) = self
            .registry
            .append_log(&self.project_id, message.as_ref())
            .await
        {
            tracing::debug!(project_id = %self.project_id, error = %e, "Dropped log line");
        }
    }
}
