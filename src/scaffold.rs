//! Local fallback generator: a single static page built from the prompt.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::orchestrator::{GenerationOutcome, Scaffolder};
use crate::sandbox::FileSandbox;

const ENTRY_FILE: &str = "index.html";
const STYLES_FILE: &str = "styles.css";
const MAX_TITLE_CHARS: usize = 60;

const STYLES: &str = r#"*,
*::before,
*::after {
  box-sizing: border-box;
}

body {
  margin: 0;
  min-height: 100vh;
  display: flex;
  align-items: center;
  justify-content: center;
  font-family: system-ui, -apple-system, "Segoe UI", sans-serif;
  background: #0f172a;
  color: #e2e8f0;
}

main {
  max-width: 42rem;
  padding: 3rem 2rem;
}

h1 {
  font-size: 2.25rem;
  margin: 0 0 1rem;
}

.prompt {
  white-space: pre-wrap;
  line-height: 1.6;
  color: #94a3b8;
}
"#;

/// Writes `index.html` and `styles.css` into the generation root.
#[derive(Debug, Default, Clone)]
pub struct StaticScaffolder;

impl StaticScaffolder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Scaffolder for StaticScaffolder {
    async fn generate(&self, root: &Path, prompt: &str) -> Result<GenerationOutcome> {
        let files = FileSandbox::new(root);
        let page = render_page(prompt);
        files
            .write_many([(ENTRY_FILE, page.as_str()), (STYLES_FILE, STYLES)], true)
            .await
            .with_context(|| format!("Failed to write scaffold into {}", root.display()))?;
        Ok(GenerationOutcome::with_preview(ENTRY_FILE))
    }
}

fn render_page(prompt: &str) -> String {
    let title = escape_html(&title_from_prompt(prompt));
    let body = escape_html(prompt.trim());
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{title}</title>
    <link rel="stylesheet" href="{STYLES_FILE}" />
  </head>
  <body>
    <main>
      <h1>{title}</h1>
      <p class="prompt">{body}</p>
    </main>
  </body>
</html>
"#
    )
}

/// First non-empty line of the prompt, cut at a character boundary.
fn title_from_prompt(prompt: &str) -> String {
    let line = prompt
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Generated App");
    if line.chars().count() <= MAX_TITLE_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
