use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ProjectError;

/// Longest accepted prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 4096;

/// Directory under a project's directory that holds the generated tree.
pub const GENERATION_DIR: &str = "generated-app";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Running,
    Ready,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// `ready` and `failed` end a generation run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frontend stack hint passed through to the generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Next,
    Vite,
    React,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Vite => "vite",
            Self::React => "react",
        }
    }
}

impl FromStr for Template {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "vite" => Ok(Self::Vite),
            "react" => Ok(Self::React),
            _ => Err(format!("Invalid template: {} (expected next, vite or react)", s)),
        }
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one project. Records are never mutated in place; every
/// change produces a new `Project` that replaces the old one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub prompt: String,
    pub template: Option<Template>,
    pub status: ProjectStatus,
    /// Relative to the generation root, `/`-separated
    pub preview_path: Option<String>,
    pub project_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn generation_root(&self) -> PathBuf {
        generation_root(&self.project_dir)
    }

    /// Copy of this record with `updated_at` advanced. Never moves backwards,
    /// even if the wall clock does.
    pub(crate) fn touched(&self) -> Self {
        Self {
            updated_at: Utc::now().max(self.updated_at),
            ..self.clone()
        }
    }
}

pub(crate) fn generation_root(project_dir: &Path) -> PathBuf {
    project_dir.join(GENERATION_DIR)
}

/// Reject empty, whitespace-only and over-long prompts.
pub fn validate_prompt(prompt: &str) -> Result<(), ProjectError> {
    if prompt.trim().is_empty() {
        return Err(ProjectError::Validation("prompt must not be empty".to_string()));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(ProjectError::Validation(format!(
            "prompt is {} characters, the limit is {}",
            chars, MAX_PROMPT_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ProjectStatus::Created,
            ProjectStatus::Running,
            ProjectStatus::Ready,
            ProjectStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProjectStatus>().unwrap(), status);
        }
        assert!("done".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ProjectStatus::Created.is_terminal());
        assert!(!ProjectStatus::Running.is_terminal());
        assert!(ProjectStatus::Ready.is_terminal());
        assert!(ProjectStatus::Failed.is_terminal());
    }

    #[test]
    fn test_template_parse() {
        assert_eq!("vite".parse::<Template>().unwrap(), Template::Vite);
        assert!("angular".parse::<Template>().is_err());
        assert_eq!(serde_json::to_value(Template::Next).unwrap(), "next");
    }

    #[test]
    fn test_validate_prompt_bounds() {
        assert!(validate_prompt("Build a landing page").is_ok());
        assert!(validate_prompt("x").is_ok());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_CHARS)).is_ok());

        assert!(matches!(validate_prompt(""), Err(ProjectError::Validation(_))));
        assert!(matches!(validate_prompt("  \n\t"), Err(ProjectError::Validation(_))));
        assert!(matches!(
            validate_prompt(&"x".repeat(MAX_PROMPT_CHARS + 1)),
            Err(ProjectError::Validation(_))
        ));
    }

    #[test]
    fn test_prompt_limit_counts_characters_not_bytes() {
        // 4096 two-byte characters is still within the limit.
        assert!(validate_prompt(&"é".repeat(MAX_PROMPT_CHARS)).is_ok());
    }
}
