use anyhow::{Context, Result};
use stagehand::cli::commands::{HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand};
use stagehand::cli::output::*;
use stagehand::cli::{Cli, Command};
use stagehand::core::{
    CancellationToken, EnvSecretStore, PipelineConfig, RunContext, RunStatus, SecretStore,
    TriggerEvent,
};
use stagehand::execution::{Deployer, ExecutionEvent, PipelineEngine, ProviderRegistry};
use stagehand::persistence::{PersistenceBackend, RunSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to set logging subscriber")?;
    } else {
        let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to set logging subscriber")?;
    }

    // Execute command
    let exit_code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    let store = stagehand::persistence::SqliteRunStore::with_default_path()
        .await
        .context("Failed to open run history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without the sqlite feature; run history is not kept between invocations");
    Ok(Arc::new(stagehand::persistence::InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    let pipeline = config.to_pipeline()?;

    let workspace = match &cmd.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Workspace {} does not exist", workspace.display()))?;

    let mut variables = HashMap::new();
    for (key, value) in &cmd.var {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
        variables.insert(key.clone(), value.clone());
    }

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling the run");
            on_interrupt.cancel();
        }
    });

    let trigger = TriggerEvent::new(&cmd.branch, cmd.event.into());
    let ctx = RunContext::new(trigger, workspace)
        .with_variables(variables)
        .with_cancellation(cancellation);

    let secrets: Arc<dyn SecretStore> = match &cmd.secret_prefix {
        Some(prefix) => Arc::new(EnvSecretStore::with_prefix(prefix)),
        None => Arc::new(EnvSecretStore::new()),
    };
    let mut engine = PipelineEngine::new(Deployer::new(ProviderRegistry::with_defaults(), secrets));
    if !cmd.no_history {
        engine = engine.with_history(open_history().await?);
    }

    // Set up event handler for console output
    let progress = create_progress_bar(pipeline.stages.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::StageStarted { stage, .. } => bar.set_message(stage.clone()),
            ExecutionEvent::StageSkipped { .. } | ExecutionEvent::StageFinished { .. } => {
                bar.inc(1)
            }
            _ => {}
        }
        bar.println(format_execution_event(&event));
    });

    println!();
    let run = engine.execute(&pipeline, &ctx).await;
    progress.finish_and_clear();

    match run.status() {
        RunStatus::Rejected => {
            println!(
                "\n{} {} was not triggered by branch {}",
                INFO,
                style(&pipeline.name).bold(),
                style(&cmd.branch).cyan()
            );
        }
        RunStatus::Succeeded => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
        }
        status => {
            println!(
                "\n{} {} {} (exit code {})",
                CROSS,
                style(&pipeline.name).bold(),
                format_status(status),
                run.exit_code()
            );
            if let Some((stage, failure)) = run.first_failure() {
                println!(
                    "  First failure: stage {} step {} '{}'",
                    style(&stage.stage).bold(),
                    failure.index,
                    failure.step
                );
            }
        }
    }

    Ok(run.exit_code())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file).and_then(|config| {
        config.to_pipeline()?;
        Ok(config)
    }) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Trigger branch: {}", style(&config.trigger.branch).cyan());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            let deployments: usize = config.stages.iter().map(|s| s.deployments.len()).sum();
            println!("  Deployments: {}", style(deployments).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(1)
        }
    }
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<i32> {
    let pipeline = PipelineConfig::from_file(&cmd.file)
        .context("Failed to load pipeline config")?
        .to_pipeline()?;
    let trigger = TriggerEvent::new(&cmd.branch, cmd.event.into());

    println!(
        "{} Plan for {} on {} ({})",
        INFO,
        style(&pipeline.name).bold(),
        style(&trigger.branch).cyan(),
        trigger.event
    );
    println!("{}", format_plan(&pipeline.plan(&trigger)));
    Ok(0)
}

async fn list_pipelines(cmd: &ListCommand) -> Result<i32> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len(),
                "succeeded": runs.iter().filter(|r| r.status == RunStatus::Succeeded).count(),
                "failed": runs.iter().filter(|r| r.status == RunStatus::Failed).count(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(0);
    }

    println!("{} Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(pipeline_name).await?;
            let succeeded = runs.iter().filter(|r| r.status == RunStatus::Succeeded).count();
            let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => println!("{} Run not found", WARN),
        }
        return Ok(0);
    }

    let mut runs = match &cmd.pipeline {
        Some(pipeline) => store.list_runs(pipeline).await?,
        None => {
            let mut all_runs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_runs.extend(store.list_runs(&pipeline).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(0);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(0)
}

fn print_run_details(summary: &RunSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline).bold());
    println!("  Trigger: {} ({})", style(&summary.branch).cyan(), summary.event);
    println!("  Status: {}", format_status(summary.status));
    println!("  Exit code: {}", summary.exit_code);
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }

    println!("\n  {}", style("Stages:").bold());
    for stage in &summary.stages {
        println!("    {} {}", style(&stage.stage).bold(), format_stage_outcome(&stage.outcome));
        for deployment in &stage.deployments {
            println!(
                "      {} {} via {}: {}",
                PACKAGE,
                deployment.deployment,
                deployment.provider,
                format_deploy_outcome(&deployment.outcome)
            );
        }
    }
}
