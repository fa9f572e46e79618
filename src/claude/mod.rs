//! AI generator backed by the Claude CLI.
//!
//! The CLI runs in the generation root with the prompt on stdin and
//! `--output-format stream-json`, so every assistant message arrives as one
//! JSON line that is turned into `log` events while the run is in progress.

use std::io::ErrorKind;
use std::process::Stdio;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AiSection;
use crate::errors::CollaboratorError;
use crate::orchestrator::{AiGenerator, GenerationOutcome, GenerationRequest, LogEmitter};
use crate::registry::Template;
use crate::stream::{self, StreamEvent};

/// Files the CLI may touch on its own; commands are added from the allow-list.
const FILE_TOOLS: &[&str] = &["Read", "Write", "Edit", "MultiEdit", "Glob", "Grep", "LS"];

/// Preview entry point reported when the CLI leaves one at the root.
const DEFAULT_PREVIEW: &str = "index.html";

pub struct ClaudeCliGenerator {
    claude_cmd: String,
    api_key_env: String,
}

impl ClaudeCliGenerator {
    pub fn new(claude_cmd: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            claude_cmd: claude_cmd.into(),
            api_key_env: api_key_env.into(),
        }
    }

    pub fn from_config(ai: &AiSection) -> Self {
        Self::new(ai.claude_cmd.clone(), ai.api_key_env.clone())
    }

    /// CLI flags, with one `Bash(<cmd>:*)` permission per allowed command.
    fn flags(allowed_commands: &[&str]) -> Vec<String> {
        let mut flags: Vec<String> = [
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--permission-mode",
            "acceptEdits",
            "--allowedTools",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        flags.extend(FILE_TOOLS.iter().map(|s| s.to_string()));
        flags.extend(allowed_commands.iter().map(|cmd| format!("Bash({}:*)", cmd)));
        flags
    }

    pub fn compose_prompt(prompt: &str, template: Option<Template>, allowed_commands: &[&str]) -> String {
        let intro = "You are an expert full-stack engineer. Follow best practices, \
                     structure the project cleanly, and ensure the app runs with pnpm. \
                     Always include a complete package.json with install and build scripts, \
                     and make the build write its output to dist/.";
        let task = match template {
            Some(template) => format!(
                "Build a complete {} application based on the user's instructions.",
                template
            ),
            None => "Generate a fully working modern React, Vite, or Next.js application \
                     based on the user's instructions."
                .to_string(),
        };
        let commands = if allowed_commands.is_empty() {
            "Do not run shell commands.".to_string()
        } else {
            format!("Only these commands may be run: {}.", allowed_commands.join(", "))
        };
        format!(
            "{}\n{}\nWork only inside the current directory. {}\nUser prompt: {}",
            intro, task, commands, prompt
        )
    }
}

#[async_trait]
impl AiGenerator for ClaudeCliGenerator {
    fn is_available(&self) -> bool {
        std::env::var(&self.api_key_env)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        logs: &LogEmitter,
    ) -> Result<GenerationOutcome, CollaboratorError> {
        if !self.is_available() {
            return Err(CollaboratorError::Unavailable(format!(
                "{} is not set",
                self.api_key_env
            )));
        }

        let allowed = request.tools.commands().allowed_commands();
        let prompt = Self::compose_prompt(&request.prompt, request.template, &allowed);

        info!(project_id = %request.project_id, cmd = %self.claude_cmd, "Spawning Claude CLI");
        let mut child = Command::new(&self.claude_cmd)
            .args(Self::flags(&allowed))
            .current_dir(&request.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    CollaboratorError::Unavailable(format!("'{}' was not found", self.claude_cmd))
                } else {
                    CollaboratorError::Failed(
                        anyhow!(e).context(format!("Failed to spawn '{}'", self.claude_cmd)),
                    )
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to Claude stdin")?;
            stdin
                .shutdown()
                .await
                .context("Failed to close Claude stdin")?;
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdout = child.stdout.take().context("Failed to capture Claude stdout")?;
        let mut lines = BufReader::new(stdout).lines();
        let mut final_error: Option<String> = None;

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read Claude output")?,
                _ = request.cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(anyhow!("Claude run cancelled").into());
                }
            };
            let Some(line) = line else { break };

            match stream::parse_line(&line) {
                Some(StreamEvent::Result {
                    is_error, result, ..
                }) => {
                    if is_error {
                        final_error = Some(result.unwrap_or_else(|| "unknown error".to_string()));
                    }
                }
                Some(event) => {
                    for entry in stream::log_lines(&event) {
                        logs.emit(entry).await;
                    }
                }
                None => {
                    if !line.trim().is_empty() {
                        debug!(project_id = %request.project_id, line = %line, "Unparsed Claude output");
                    }
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for Claude")?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(anyhow!(
                "Claude exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )
            .into());
        }
        if let Some(message) = final_error {
            return Err(anyhow!("Claude reported an error: {}", message).into());
        }

        let preview = request.tools.files().paths().resolve(DEFAULT_PREVIEW).ok();
        Ok(GenerationOutcome {
            preview_path: preview
                .filter(|p| p.is_file())
                .map(|_| DEFAULT_PREVIEW.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind};
    use crate::registry::ProjectRegistry;
    use crate::tools::ToolBox;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_compose_prompt_with_template() {
        let prompt = ClaudeCliGenerator::compose_prompt("todo app", Some(Template::Vite), &["pnpm"]);
        assert!(prompt.contains("Build a complete vite application"));
        assert!(prompt.contains("package.json"));
        assert!(prompt.contains("Only these commands may be run: pnpm."));
        assert!(prompt.ends_with("User prompt: todo app"));
    }

    #[test]
    fn test_compose_prompt_without_template() {
        let prompt = ClaudeCliGenerator::compose_prompt("todo app", None, &[]);
        assert!(prompt.contains("React, Vite, or Next.js"));
        assert!(prompt.contains("Do not run shell commands."));
    }

    #[test]
    fn test_flags_grant_allowed_commands() {
        let flags = ClaudeCliGenerator::flags(&["npm", "pnpm"]);
        assert!(flags.contains(&"stream-json".to_string()));
        assert!(flags.contains(&"Bash(pnpm:*)".to_string()));
        assert!(flags.contains(&"Bash(npm:*)".to_string()));
        assert!(!flags.iter().any(|f| f == "Bash"));
    }

    #[test]
    fn test_availability_follows_key_variable() {
        let missing = ClaudeCliGenerator::new("claude", "APP_FOUNDRY_TEST_KEY_THAT_IS_NEVER_SET");
        assert!(!missing.is_available());
        // PATH is always set in a test environment.
        let present = ClaudeCliGenerator::new("claude", "PATH");
        assert!(present.is_available());
    }

    async fn request(dir: &tempfile::TempDir) -> (Arc<ProjectRegistry>, GenerationRequest) {
        let registry = Arc::new(ProjectRegistry::new(dir.path(), EventBus::new(100, None)));
        let project = registry.create("landing page", None).await.unwrap();
        let root = project.generation_root();
        let request = GenerationRequest {
            project_id: project.id.clone(),
            prompt: project.prompt.clone(),
            template: None,
            tools: ToolBox::new(&root, ["pnpm"]),
            root,
            cancel: CancellationToken::new(),
        };
        (registry, request)
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, request) = request(&dir).await;
        let logs = LogEmitter::new(registry, &request.project_id);
        let generator = ClaudeCliGenerator::new("app-foundry-no-such-claude-binary", "PATH");

        let result = generator.generate(&request, &logs).await;
        assert!(matches!(result, Err(CollaboratorError::Unavailable(_))));
    }

    #[cfg(unix)]
    fn fake_claude(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-claude.sh");
        std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_is_forwarded_as_logs() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_claude(
            &dir,
            r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Creating the page"}]}}'
echo '<h1>hi</h1>' > index.html
echo '{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{"file_path":"index.html"}}]}}'
echo '{"type":"result","subtype":"success","result":"done","is_error":false}'
"#,
        );
        let (registry, request) = request(&dir).await;
        let logs = LogEmitter::new(registry.clone(), &request.project_id);

        let outcome = ClaudeCliGenerator::new(script, "PATH")
            .generate(&request, &logs)
            .await
            .unwrap();
        assert_eq!(outcome.preview_path.as_deref(), Some("index.html"));

        let messages: Vec<String> = registry
            .bus()
            .history(&request.project_id)
            .into_iter()
            .filter(|e| e.kind == EventKind::Log)
            .map(|e| e.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "[system] session started",
                "Creating the page",
                "[tool:Write] Writing index.html",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_error_result_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_claude(
            &dir,
            r#"echo '{"type":"result","subtype":"error_during_execution","result":"quota exceeded","is_error":true}'"#,
        );
        let (registry, request) = request(&dir).await;
        let logs = LogEmitter::new(registry, &request.project_id);

        let err = ClaudeCliGenerator::new(script, "PATH")
            .generate(&request, &logs)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Failed(_)));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_claude(&dir, "echo 'auth failed' >&2\nexit 1\n");
        let (registry, request) = request(&dir).await;
        let logs = LogEmitter::new(registry, &request.project_id);

        let err = ClaudeCliGenerator::new(script, "PATH")
            .generate(&request, &logs)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with code 1"));
        assert!(err.to_string().contains("auth failed"));
    }
}
