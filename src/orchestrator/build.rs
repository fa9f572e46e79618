//! Post-generation build: locate the manifest, install, build, find the
//! preview artifact.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::collaborators::LogEmitter;
use crate::config::BuildSection;
use crate::errors::SandboxError;
use crate::sandbox::{CommandSandbox, PathSandbox};

/// Built entry point, relative to the manifest directory.
pub const BUILD_ARTIFACT: &str = "dist/index.html";

/// True when `root` is a directory with at least one entry.
pub(crate) fn has_output(root: &Path) -> bool {
    std::fs::read_dir(root)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Find the directory holding `manifest`: the root itself, else the first
/// immediate subdirectory (by name) that has one. Hidden and excluded
/// directories are skipped. Returns the directory relative to `root`, with
/// `""` meaning the root.
pub(crate) fn find_manifest_dir(root: &Path, manifest: &str, excluded: &[String]) -> Option<String> {
    if root.join(manifest).is_file() {
        return Some(String::new());
    }

    let mut candidates: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.') && !excluded.contains(name))
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .find(|name| root.join(name).join(manifest).is_file())
}

/// Relative path of the build artifact for a manifest directory.
pub(crate) fn artifact_path(manifest_dir: &str) -> String {
    if manifest_dir.is_empty() {
        BUILD_ARTIFACT.to_string()
    } else {
        format!("{}/{}", manifest_dir, BUILD_ARTIFACT)
    }
}

/// Whether `relative` resolves inside the sandbox to an existing file.
pub(crate) fn preview_exists(paths: &PathSandbox, relative: &str) -> bool {
    paths
        .resolve(relative)
        .map(|resolved| resolved.is_file())
        .unwrap_or(false)
}

/// Run the install then build steps in `manifest_dir`. Every outcome is
/// logged; none of them fail the run. Returns `Err` only for cancellation.
pub(crate) async fn run_build_steps(
    commands: &CommandSandbox,
    manifest_dir: &str,
    build: &BuildSection,
    cancel: &CancellationToken,
    logs: &LogEmitter,
) -> Result<(), SandboxError> {
    for step in [&build.install, &build.build] {
        let Some((program, args)) = step.split_first() else {
            continue;
        };
        let shown = step.join(" ");
        logs.emit(format!("Running `{}`...", shown)).await;

        let cwd = (!manifest_dir.is_empty()).then_some(manifest_dir);
        match commands
            .run_with_cancel(program, args, cwd, Some(build.timeout()), cancel)
            .await
        {
            Ok(output) if output.success() => {
                logs.emit(format!("`{}` completed.", shown)).await;
            }
            Ok(output) => {
                tracing::warn!(
                    project_id = %logs.project_id(),
                    command = %shown,
                    exit_code = output.exit_code,
                    "Build step failed"
                );
                logs.emit(format!(
                    "`{}` exited with code {}.{}",
                    shown,
                    output.exit_code,
                    tail(&output.stderr)
                ))
                .await;
            }
            Err(e @ SandboxError::CommandCancelled { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    project_id = %logs.project_id(),
                    command = %shown,
                    error = %e,
                    "Build step did not run to completion"
                );
                logs.emit(format!("`{}` failed: {}", shown, e)).await;
            }
        }
    }
    Ok(())
}

/// Last few lines of a stream, prefixed with a newline, or empty.
fn tail(stream: &str) -> String {
    let lines: Vec<&str> = stream.trim_end().lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(5);
    format!("\n{}", lines[start..].join("\n"))
}
