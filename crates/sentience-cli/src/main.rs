use anyhow::Result;
use clap::Parser;

mod cli;
mod mock;
mod tools;

use cli::{Cli, Commands, OutputFormat};
use mock::{MockDriver, MockTracer};
use sentience_artifacts::{ArtifactBuffer, ArtifactBufferOptions, ClipMode, ClipOptions};
use sentience_assert::AssertEngine;
use sentience_core::{new_run_id, snapshot_digest, FailureArtifactSink, PredicateOutcome};
use sentience_step::{StepEndOptions, StepLifecycle};
use sentience_tools::ToolContext;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tools => run_tools(&cli.format),
        Commands::Demo { goal } => run_demo(&goal, &cli.format).await,
    }
}

fn run_tools(format: &OutputFormat) -> Result<()> {
    let driver = Arc::new(MockDriver::scripted_navigation());
    let registry = tools::build_registry(driver);
    let descriptions = registry.describe_for_model();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptions)?),
        OutputFormat::Text => {
            for tool in descriptions {
                println!("{} - {}", tool.name, tool.description.unwrap_or_default());
            }
        }
    }
    Ok(())
}

async fn run_demo(goal: &str, format: &OutputFormat) -> Result<()> {
    let run_id = new_run_id();
    let driver = Arc::new(MockDriver::scripted_navigation());
    let tracer = Arc::new(MockTracer::new(run_id.clone()));
    let scratch_output = tempfile::tempdir()?;
    let artifacts = Arc::new(ArtifactBuffer::new(
        run_id.clone(),
        ArtifactBufferOptions {
            output_dir: scratch_output.path().to_path_buf(),
            clip: ClipOptions { mode: ClipMode::Off, ..Default::default() },
            ..Default::default()
        },
    )?);
    let sink: Arc<dyn FailureArtifactSink> = artifacts.clone();

    let registry = tools::build_registry(driver.clone());
    let mut lifecycle = StepLifecycle::new(driver.clone(), tracer.clone(), Some(artifacts.clone()));
    let assert_engine = AssertEngine::new(driver.clone(), tracer.clone(), Some(sink));

    let step_id = lifecycle.begin_step(goal, None);

    let pre_snapshot = driver.snapshot(Default::default()).await?;
    lifecycle.observe_snapshot(&pre_snapshot);
    let pre_digest = snapshot_digest(&pre_snapshot);

    let ctx = lifecycle.build_context(Some(pre_snapshot.clone()));
    let has_sign_in: sentience_core::Predicate = Arc::new(|ctx| {
        let found = ctx
            .snapshot
            .as_ref()
            .is_some_and(|s| s.elements.iter().any(|e| e.name == "sign-in"));
        if found {
            PredicateOutcome::pass("sign-in control present")
        } else {
            let mut details = serde_json::Map::new();
            details.insert("selector".into(), serde_json::json!("#sign-in"));
            PredicateOutcome::fail("sign-in control missing").with_details(details)
        }
    });
    assert_engine
        .assert(lifecycle.step_state_mut(), &ctx, &has_sign_in, "sign_in_visible", false)
        .await;

    let tool_ctx = ToolContext::new(Some(tracer.clone()), Some(step_id.clone()));
    let tool_output = registry
        .execute("click", serde_json::json!({ "selector": "#sign-in" }), &tool_ctx)
        .await?;
    lifecycle.record_action("CLICK #sign-in", Some(driver.url())).await;

    let post_snapshot = driver.snapshot(Default::default()).await?;
    let post_digest = snapshot_digest(&post_snapshot);
    let post_ctx = lifecycle.build_context(Some(post_snapshot.clone()));
    let reached_dashboard: sentience_core::Predicate =
        Arc::new(|ctx| {
            if ctx.url.ends_with("/dashboard") {
                PredicateOutcome::pass("navigated to dashboard")
            } else {
                PredicateOutcome::fail("still on the sign-in page")
            }
        });
    let passed = assert_engine
        .assert_done(lifecycle.step_state_mut(), &post_ctx, &reached_dashboard, "reached_dashboard")
        .await;

    lifecycle.emit_step_end(StepEndOptions {
        action: Some("CLICK #sign-in".to_string()),
        success: Some(passed),
        outcome: Some(if passed { "completed" } else { "incomplete" }.to_string()),
        post_url: Some(post_snapshot.url.clone()),
        post_snapshot_digest: Some(post_digest.clone()),
        ..Default::default()
    });

    artifacts.cleanup()?;

    let summary = serde_json::json!({
        "run_id": run_id,
        "step_id": step_id,
        "tool_output": tool_output,
        "pre_snapshot_digest": pre_digest,
        "post_snapshot_digest": post_digest,
        "task_done": passed,
        "events": tracer.events(),
    });

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("run {run_id}, step {step_id}: task_done={passed}");
            for event in tracer.events() {
                println!("  {}", event["kind"].as_str().unwrap_or("?"));
            }
        }
    }

    Ok(())
}
