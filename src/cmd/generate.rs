//! One-shot generation command, `app-foundry generate "<prompt>"`.
//!
//! Runs a single project to completion in-process and prints every event
//! to stdout as it arrives.

use anyhow::{Context, Result, bail};
use app_foundry::Foundry;
use app_foundry::config::FoundryConfig;
use app_foundry::events::{EventKind, ProjectEvent};
use app_foundry::registry::{ProjectStatus, Template};

pub async fn cmd_generate(
    config: FoundryConfig,
    prompt: &str,
    template: Option<Template>,
) -> Result<()> {
    let foundry = Foundry::from_config(config);
    foundry.start().await?;

    let project = foundry
        .generate(prompt, template)
        .await
        .context("Failed to start generation")?;
    println!("Project {} created", project.id);

    let mut subscription = foundry.registry().subscribe(&project.id).await?;
    let mut finished = false;
    for event in &subscription.history {
        print_event(event);
        finished |= is_terminal(event);
    }

    while !finished {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
                finished = is_terminal(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted; stopping generation...");
                break;
            }
        }
    }
    foundry
        .registry()
        .unsubscribe(&project.id, subscription.id);

    let current = foundry.registry().get(&project.id).await?;
    let preview = current
        .preview_path
        .as_ref()
        .map(|path| current.generation_root().join(path));
    foundry.shutdown().await;

    match current.status {
        ProjectStatus::Ready => {
            println!("Project {} is ready.", current.id);
            println!("  Files:   {}", current.generation_root().display());
            if let Some(preview) = preview {
                println!("  Preview: {}", preview.display());
            }
            Ok(())
        }
        status => bail!("Generation for project {} ended as '{}'", current.id, status),
    }
}

fn is_terminal(event: &ProjectEvent) -> bool {
    event.kind == EventKind::StatusChanged
        && event
            .payload
            .get("status")
            .and_then(|s| s.as_str())
            .and_then(|s| s.parse::<ProjectStatus>().ok())
            .is_some_and(|status| status.is_terminal())
}

fn print_event(event: &ProjectEvent) {
    match event.kind {
        EventKind::Log => println!("  {}", event.message),
        EventKind::Error => match event.payload.get("detail").and_then(|d| d.as_str()) {
            Some(detail) => println!("[error] {}: {}", event.message, detail),
            None => println!("[error] {}", event.message),
        },
        kind => println!("[{}] {}", kind, event.message),
    }
}
