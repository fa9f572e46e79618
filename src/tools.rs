//! The fixed set of sandboxed operations offered to a generation backend.
//!
//! Each tool has a name, a description and a JSON schema for its arguments
//! so a backend can advertise them to a model. Calls arrive as JSON and are
//! validated through [`FileSandbox`] / [`CommandSandbox`] before anything
//! touches the filesystem.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::ToolError;
use crate::sandbox::{CommandSandbox, FileSandbox};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const CREATE_DIRECTORY: &str = "create_directory";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const RUN_COMMAND: &str = "run_command";

/// Advertised description of one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Text result of a tool call, with optional structured metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolOutput {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default = "default_overwrite")]
    overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    /// Seconds
    #[serde(default)]
    timeout: Option<f64>,
}

/// Sandboxed file and command tools bound to one project's generation root.
#[derive(Debug, Clone)]
pub struct ToolBox {
    files: FileSandbox,
    commands: CommandSandbox,
}

impl ToolBox {
    pub fn new<I, S>(root: impl Into<PathBuf>, allowed_commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.into();
        Self {
            files: FileSandbox::new(root.clone()),
            commands: CommandSandbox::new(root, allowed_commands),
        }
    }

    /// Timeout for `run_command` calls that do not pass one.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.commands = self.commands.with_default_timeout(timeout);
        self
    }

    pub fn files(&self) -> &FileSandbox {
        &self.files
    }

    pub fn commands(&self) -> &CommandSandbox {
        &self.commands
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: READ_FILE,
                description: "Read a UTF-8 encoded file within the project sandbox.",
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            },
            ToolDefinition {
                name: WRITE_FILE,
                description: "Create or overwrite a UTF-8 file within the project sandbox.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"},
                        "overwrite": {"type": "boolean", "default": true}
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolDefinition {
                name: CREATE_DIRECTORY,
                description: "Create a directory (and parents) within the project sandbox.",
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            },
            ToolDefinition {
                name: LIST_DIRECTORY,
                description: "List files within the project sandbox.",
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": ["string", "null"]}}
                }),
            },
            ToolDefinition {
                name: RUN_COMMAND,
                description: "Execute a whitelisted command within the project sandbox.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string"},
                        "args": {"type": "array", "items": {"type": "string"}},
                        "cwd": {"type": ["string", "null"]},
                        "timeout": {"type": ["number", "null"]}
                    },
                    "required": ["command"]
                }),
            },
        ]
    }

    /// Dispatch a tool call by name.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        match name {
            READ_FILE => {
                let args: PathArgs = parse(name, args)?;
                let content = self.files.read_text(&args.path).await?;
                Ok(ToolOutput::text(content))
            }
            WRITE_FILE => {
                let args: WriteArgs = parse(name, args)?;
                self.files
                    .write_text(&args.path, &args.content, args.overwrite)
                    .await?;
                Ok(ToolOutput::text(format!("Wrote file {}", args.path)))
            }
            CREATE_DIRECTORY => {
                let args: PathArgs = parse(name, args)?;
                self.files.create_directory(&args.path).await?;
                Ok(ToolOutput::text(format!("Created directory {}", args.path)))
            }
            LIST_DIRECTORY => {
                let args: ListArgs = parse(name, args)?;
                let entries = self.files.list_directory(args.path.as_deref()).await?;
                let text = serde_json::to_string_pretty(&entries).map_err(|e| {
                    ToolError::InvalidArguments {
                        tool: name.to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(ToolOutput::text(text))
            }
            RUN_COMMAND => {
                let args: CommandArgs = parse(name, args)?;
                let timeout = args
                    .timeout
                    .map(|secs| parse_timeout(name, secs))
                    .transpose()?;
                let output = self
                    .commands
                    .run(&args.command, &args.args, args.cwd.as_deref(), timeout)
                    .await?;
                Ok(ToolOutput {
                    text: serde_json::to_string_pretty(&output).unwrap_or_default(),
                    metadata: Some(json!({"exit_code": output.exit_code})),
                })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// A positive number of seconds that fits in a `Duration`.
fn parse_timeout(tool: &str, secs: f64) -> Result<Duration, ToolError> {
    let invalid = |detail: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: format!("timeout must be a positive number of seconds, {}", detail),
    };
    if secs.is_nan() || secs <= 0.0 {
        return Err(invalid(format!("got {}", secs)));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(format!("got {} ({})", secs, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;

    #[test]
    fn test_definitions_cover_every_tool() {
        let names: Vec<_> = ToolBox::definitions().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![READ_FILE, WRITE_FILE, CREATE_DIRECTORY, LIST_DIRECTORY, RUN_COMMAND]
        );
    }

    #[tokio::test]
    async fn test_write_read_and_list_through_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), Vec::<String>::new());

        tools
            .invoke(WRITE_FILE, json!({"path": "src/main.ts", "content": "export {}"}))
            .await
            .unwrap();
        let read = tools
            .invoke(READ_FILE, json!({"path": "src/main.ts"}))
            .await
            .unwrap();
        assert_eq!(read.text, "export {}");

        let listing = tools.invoke(LIST_DIRECTORY, json!({})).await.unwrap();
        let entries: Vec<Value> = serde_json::from_str(&listing.text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["path"], "src/main.ts");
    }

    #[tokio::test]
    async fn test_write_without_overwrite_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), Vec::<String>::new());
        let args = json!({"path": "a.txt", "content": "x", "overwrite": false});
        tools.invoke(WRITE_FILE, args.clone()).await.unwrap();

        let result = tools.invoke(WRITE_FILE, args).await;
        assert!(matches!(
            result,
            Err(ToolError::Sandbox(SandboxError::PathValidation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), Vec::<String>::new());

        assert!(matches!(
            tools.invoke("delete_everything", json!({})).await,
            Err(ToolError::UnknownTool(_))
        ));
        assert!(matches!(
            tools.invoke(READ_FILE, json!({"file": "x"})).await,
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_command_rejects_unusable_timeouts() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), ["sh"]);

        for timeout in [json!(0), json!(-3.5), json!(1e300)] {
            let result = tools
                .invoke(
                    RUN_COMMAND,
                    json!({"command": "sh", "args": ["-c", "true"], "timeout": timeout}),
                )
                .await;
            assert!(
                matches!(result, Err(ToolError::InvalidArguments { .. })),
                "timeout {} was accepted",
                timeout
            );
        }
    }

    #[test]
    fn test_parse_timeout_accepts_fractional_seconds() {
        assert_eq!(parse_timeout(RUN_COMMAND, 1.5).unwrap(), Duration::from_millis(1500));
        assert!(parse_timeout(RUN_COMMAND, f64::INFINITY).is_err());
        assert!(parse_timeout(RUN_COMMAND, f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_run_command_rejects_disallowed_program() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), ["node"]);
        let result = tools
            .invoke(RUN_COMMAND, json!({"command": "rm", "args": ["-rf", "/"]}))
            .await;
        assert!(matches!(
            result,
            Err(ToolError::Sandbox(SandboxError::CommandValidation { .. }))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_reports_exit_code_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), ["sh"]);
        let output = tools
            .invoke(
                RUN_COMMAND,
                json!({"command": "sh", "args": ["-c", "echo hi; exit 4"], "timeout": 5}),
            )
            .await
            .unwrap();
        assert_eq!(output.metadata, Some(json!({"exit_code": 4})));
        let parsed: Value = serde_json::from_str(&output.text).unwrap();
        assert_eq!(parsed["stdout"], "hi\n");
    }
}
