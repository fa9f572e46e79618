//! Unified configuration for app-foundry.
//!
//! Settings are layered: built-in defaults, then `foundry.toml`, then
//! environment variables (a `.env` file is loaded first), then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! api_prefix = "/api"
//! dev_mode = false
//!
//! [projects]
//! root = "data/projects"
//! history_limit = 500
//! # subscriber_capacity = 1024
//! excluded_dirs = ["node_modules", ".pnpm-store", ".next", ".turbo", ".git"]
//!
//! [sandbox]
//! allowed_commands = ["pnpm", "npm", "node", "npx"]
//! default_timeout_secs = 120
//!
//! [build]
//! manifest = "package.json"
//! install = ["pnpm", "install"]
//! build = ["pnpm", "run", "build"]
//! timeout_secs = 900
//!
//! [ai]
//! claude_cmd = "claude"
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [logging]
//! json = false
//! # log_dir = "logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "foundry.toml";

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Prefix for API routes and preview URLs
    pub api_prefix: String,
    /// Permissive CORS for a local frontend dev server
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_prefix: "/api".to_string(),
            dev_mode: false,
        }
    }
}

/// Project registry and event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsSection {
    /// Directory under which every project gets `<root>/<id>`
    pub root: PathBuf,
    /// Retained events per project
    pub history_limit: usize,
    /// Bounded subscriber queues (disconnect-slow-consumer); unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_capacity: Option<usize>,
    /// Directory names pruned from file listings and manifest scans
    pub excluded_dirs: Vec<String>,
}

impl Default for ProjectsSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/projects"),
            history_limit: 500,
            subscriber_capacity: None,
            excluded_dirs: default_excluded_dirs(),
        }
    }
}

fn default_excluded_dirs() -> Vec<String> {
    ["node_modules", ".pnpm-store", ".next", ".turbo", ".git"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Command sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub allowed_commands: Vec<String>,
    pub default_timeout_secs: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            allowed_commands: ["pnpm", "npm", "node", "npx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_timeout_secs: 120,
        }
    }
}

/// Post-generation build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// File that marks a buildable directory
    pub manifest: String,
    /// Install step, program first
    pub install: Vec<String>,
    /// Build step, program first
    pub build: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            manifest: "package.json".to_string(),
            install: vec!["pnpm".to_string(), "install".to_string()],
            build: vec!["pnpm".to_string(), "run".to_string(), "build".to_string()],
            timeout_secs: 900,
        }
    }
}

impl BuildSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Claude CLI collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSection {
    pub claude_cmd: String,
    /// Environment variable whose presence marks the AI generator as available
    pub api_key_env: String,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            claude_cmd: "claude".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// The complete foundry.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundryConfig {
    pub server: ServerSection,
    pub projects: ProjectsSection,
    pub sandbox: SandboxSection,
    pub build: BuildSection,
    pub ai: AiSection,
    pub logging: LoggingSection,
}

impl FoundryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse foundry.toml")
    }

    /// Load `path` if given (it must exist), otherwise `foundry.toml` in the
    /// working directory if present, otherwise defaults. Environment
    /// overrides are applied on top.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `FOUNDRY_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("FOUNDRY_PROJECTS_ROOT") {
            self.projects.root = PathBuf::from(root);
        }
        if let Some(port) = lookup("FOUNDRY_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid FOUNDRY_PORT '{}'", port))?;
        }
        if let Some(commands) = lookup("FOUNDRY_ALLOWED_COMMANDS") {
            self.sandbox.allowed_commands = commands
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(limit) = lookup("FOUNDRY_HISTORY_LIMIT") {
            self.projects.history_limit = limit
                .parse()
                .with_context(|| format!("Invalid FOUNDRY_HISTORY_LIMIT '{}'", limit))?;
        }
        if let Some(secs) = lookup("FOUNDRY_BUILD_TIMEOUT_SECS") {
            self.build.timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid FOUNDRY_BUILD_TIMEOUT_SECS '{}'", secs))?;
        }
        if let Some(cmd) = lookup("FOUNDRY_CLAUDE_CMD") {
            self.ai.claude_cmd = cmd;
        }
        Ok(())
    }

    /// Check values that serde cannot reject on its own.
    /// Returns a list of human-readable problems; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.projects.history_limit == 0 {
            problems.push("projects.history_limit must be at least 1".to_string());
        }
        if self.projects.subscriber_capacity == Some(0) {
            problems.push("projects.subscriber_capacity must be at least 1".to_string());
        }
        if self.build.install.is_empty() || self.build.build.is_empty() {
            problems.push("build.install and build.build must name a program".to_string());
        }
        if self.build.manifest.trim().is_empty() {
            problems.push("build.manifest must not be empty".to_string());
        }
        if !self.server.api_prefix.starts_with('/') {
            problems.push(format!(
                "server.api_prefix '{}' must start with '/'",
                self.server.api_prefix
            ));
        }
        problems
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.default_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = FoundryConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.api_prefix, "/api");
        assert_eq!(config.projects.history_limit, 500);
        assert!(config.projects.subscriber_capacity.is_none());
        assert_eq!(config.build.timeout_secs, 900);
        assert_eq!(config.build.install, vec!["pnpm", "install"]);
        assert!(config.sandbox.allowed_commands.contains(&"pnpm".to_string()));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let content = r#"
[server]
port = 9001

[projects]
history_limit = 50
"#;
        let config = FoundryConfig::parse(content).unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "127.0.0.1"); // default
        assert_eq!(config.projects.history_limit, 50);
        assert_eq!(config.build.manifest, "package.json"); // default
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(FoundryConfig::parse("not valid toml {{{{").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[sandbox]
allowed_commands = ["npm"]
default_timeout_secs = 30

[build]
install = ["npm", "ci"]
"#,
        )
        .unwrap();

        let config = FoundryConfig::load(&path).unwrap();
        assert_eq!(config.sandbox.allowed_commands, vec!["npm"]);
        assert_eq!(config.default_command_timeout(), Duration::from_secs(30));
        assert_eq!(config.build.install, vec!["npm", "ci"]);
        assert_eq!(config.build.build, vec!["pnpm", "run", "build"]); // default
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = FoundryConfig::parse("[server]\nport = 9001\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("FOUNDRY_PORT", "7000"),
            ("FOUNDRY_ALLOWED_COMMANDS", "npm, node ,"),
            ("FOUNDRY_PROJECTS_ROOT", "/srv/projects"),
            ("FOUNDRY_BUILD_TIMEOUT_SECS", "60"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.sandbox.allowed_commands, vec!["npm", "node"]);
        assert_eq!(config.projects.root, PathBuf::from("/srv/projects"));
        assert_eq!(config.build.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_env_rejects_malformed_numbers() {
        let mut config = FoundryConfig::default();
        let result = config.apply_env(|key| {
            (key == "FOUNDRY_HISTORY_LIMIT").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = FoundryConfig::default();
        config.projects.history_limit = 0;
        config.projects.subscriber_capacity = Some(0);
        config.server.api_prefix = "api".to_string();
        let problems = config.validate();
        assert_eq!(problems.len(), 3);
    }
}
