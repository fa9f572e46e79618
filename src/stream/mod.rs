//! Parsing of the Claude CLI `stream-json` output into readable log lines.

use serde::Deserialize;
use serde_json::Value;

/// One line of Claude CLI `--output-format stream-json` output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Assistant {
        message: AssistantMessage,
    },

    User {
        #[serde(default)]
        tool_use_result: Option<Value>,
    },

    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    Text {
        text: String,
    },

    Thinking {
        #[serde(default)]
        thinking: String,
    },

    #[serde(other)]
    Other,
}

/// Parse one stdout line. `None` for blank lines and non-JSON output.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Log lines worth forwarding for an event. Results and bookkeeping events
/// produce nothing; the caller handles the final result separately.
pub fn log_lines(event: &StreamEvent) -> Vec<String> {
    match event {
        StreamEvent::Assistant { message } => message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => {
                    let text = text.trim();
                    (!text.is_empty()).then(|| text.to_string())
                }
                ContentBlock::ToolUse { name, input } => {
                    Some(format!("[tool:{}] {}", name, describe_tool_use(name, input)))
                }
                ContentBlock::Thinking { thinking } => {
                    let snippet = first_line(thinking, 80);
                    (!snippet.is_empty()).then(|| format!("[thinking] {}", snippet))
                }
                ContentBlock::Other => None,
            })
            .collect(),
        StreamEvent::System { subtype } if subtype == "init" => {
            vec!["[system] session started".to_string()]
        }
        _ => Vec::new(),
    }
}

/// Human-readable summary of a tool call.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" | "read_file" => format!("Reading {}", path_or(field("file_path").or(field("path")))),
        "Write" | "write_file" => format!("Writing {}", path_or(field("file_path").or(field("path")))),
        "Edit" | "MultiEdit" => format!("Editing {}", path_or(field("file_path"))),
        "Bash" => format!("Running {}", truncate(field("command").unwrap_or("command"), 60)),
        "run_command" => {
            let args = input
                .get("args")
                .and_then(Value::as_array)
                .map(|args| {
                    args.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            let line = format!("{} {}", field("command").unwrap_or("command"), args);
            format!("Running {}", truncate(line.trim(), 60))
        }
        "Glob" => format!("Searching {}", field("pattern").unwrap_or("*")),
        "Grep" => format!("Grep {}", truncate(field("pattern").unwrap_or("pattern"), 40)),
        "create_directory" => format!("Creating {}", path_or(field("path"))),
        "list_directory" | "LS" => format!("Listing {}", field("path").unwrap_or(".")),
        _ => name.to_string(),
    }
}

fn path_or(path: Option<&str>) -> String {
    path.map(shorten_path).unwrap_or_else(|| "file".to_string())
}

/// Keep the last two components of a path.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Cut at a character boundary, marking the cut with `...`.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    truncate(text.lines().next().unwrap_or("").trim(), max_chars)
}
