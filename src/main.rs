use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stepr::artifact::FileArtifactSaver;
use stepr::ci::{CiMonitor, CiProgress, GhCheckProvider};
use stepr::config::Config;
use stepr::domain::{StepStatus, Task};
use stepr::driver::{TaskDriver, TaskOutcome, load_task, save_task};
use stepr::executor::{Builtins, ExecutionContext, ExecutorRegistry};
use stepr::human::approval_key;
use stepr::loops::{FileStateStore, Scratchpad};
use stepr::workflow::{Workflow, parse_set};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("stepr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn tasks_dir(config: &Config) -> PathBuf {
    config.storage.data_dir.join("tasks")
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            workflow,
            task_id,
            workspace,
            dry_run,
            set,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(handle_run_command(
                workflow,
                task_id.as_deref(),
                workspace,
                *dry_run,
                set,
                config,
                cli.is_verbose(),
            ))
        }
        Commands::State { task_id, step } => handle_state_command(task_id, step, config),
        Commands::Scratchpad { task_id, step, json } => handle_scratchpad_command(task_id, step, *json, config),
        Commands::Approve { task_id, step } => handle_decision_command(task_id, step, true, None, config),
        Commands::Reject { task_id, step, reason } => {
            handle_decision_command(task_id, step, false, reason.as_deref(), config)
        }
    }
}

fn status_label(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Success => status.as_str().green(),
        StepStatus::NoChanges | StepStatus::Skipped | StepStatus::WouldExecute => status.as_str().cyan(),
        StepStatus::AwaitingApproval => status.as_str().yellow(),
        StepStatus::Failed => status.as_str().red(),
    }
}

fn print_progress(progress: &CiProgress) {
    let summary = stepr::ci::CheckSummary::from_checks(&progress.checks);
    let elapsed = stepr::duration::format_duration(progress.elapsed);
    match &progress.error {
        Some(error) => println!(
            "  {} #{} {:?} status fetch failed: {} ({})",
            "CI".cyan(),
            progress.target,
            progress.phase,
            error.yellow(),
            elapsed
        ),
        None => println!(
            "  {} #{} {:?} {} checks, {} pending ({})",
            "CI".cyan(),
            progress.target,
            progress.phase,
            summary.total(),
            summary.pending,
            elapsed
        ),
    }
}

async fn handle_run_command(
    workflow_path: &Path,
    task_id: Option<&str>,
    workspace: &str,
    dry_run: bool,
    sets: &[String],
    config: &Config,
    verbose: bool,
) -> Result<()> {
    let workflow = Workflow::load(workflow_path)
        .with_context(|| format!("Failed to load workflow {}", workflow_path.display()))?;
    let tasks = tasks_dir(config);

    let mut task = match task_id {
        Some(id) => match load_task(&tasks, id)? {
            Some(task) => {
                println!("{} {} at step {}", "Resuming:".green(), task.id, task.current_step);
                task
            }
            None => workflow.new_task(id),
        },
        None => workflow.new_task(Task::generate_id()),
    };
    for raw in sets {
        let (key, value) = parse_set(raw)?;
        task.set_metadata(key, value);
    }
    info!("Running workflow '{}' for task {}", workflow.name, task.id);
    println!("{} {} ({})", "Task:".green(), task.id, workflow.name);

    let store = Arc::new(FileStateStore::new(config.storage.state_dir()).context("Failed to open state store")?);
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<CiProgress>();
    let watcher = Arc::new(CiMonitor::new(Arc::new(GhCheckProvider::new())));
    let registry = Arc::new(ExecutorRegistry::with_builtins(
        Builtins::new(store)
            .with_ci_watcher(watcher)
            .with_ci_progress(progress_tx)
            .with_scratchpad_dir(config.storage.scratchpads_dir()),
    ));

    let cancel = CancellationToken::new();
    let ctx = ExecutionContext::new(registry)
        .with_cancel(cancel.clone())
        .with_workspace(workspace)
        .with_artifacts(Arc::new(FileArtifactSaver::new(config.storage.artifacts_dir())))
        .with_config(Arc::new(config.clone()));

    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            if verbose {
                print_progress(&progress);
            }
        }
    });
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("{}", "Interrupt received, cancelling...".yellow());
                cancel.cancel();
            }
        })
    };

    let first_new = task.step_results.len();
    let driver = TaskDriver::new(ctx, workflow.steps.clone()).dry_run(dry_run);
    let outcome = driver.run(&mut task).await;
    interrupt.abort();
    drop(driver);
    let _ = printer.await;

    for result in &task.step_results[first_new..] {
        println!(
            "  {:<20} {:<18} {}",
            result.step_name,
            status_label(result.status),
            result.output.lines().next().unwrap_or("")
        );
    }

    if !dry_run {
        let path = save_task(&tasks, &task)?;
        info!("Saved task {} to {}", task.id, path.display());
    }

    match outcome {
        Ok(TaskOutcome::Completed) => {
            println!("{} {}", "Completed:".green(), task.id);
            Ok(())
        }
        Ok(TaskOutcome::AwaitingApproval { step }) => {
            println!(
                "{} step '{}' of {}; run `stepr approve {} {}` then re-run with --task-id",
                "Awaiting approval:".yellow(),
                step,
                task.id,
                task.id,
                step
            );
            Ok(())
        }
        Ok(TaskOutcome::Failed { step, error }) => {
            bail!("step '{}' failed: {}", step, error.unwrap_or_else(|| "no error reported".into()))
        }
        Err(e) if e.is_cancelled() => {
            println!("{} {} (resume with --task-id {})", "Cancelled:".red(), task.id, task.id);
            Ok(())
        }
        Err(e) => Err(e).context("Workflow run failed"),
    }
}

fn handle_state_command(task_id: &str, step: &str, config: &Config) -> Result<()> {
    info!("Showing loop state for {} / {}", task_id, step);
    let store = FileStateStore::new(config.storage.state_dir()).context("Failed to open state store")?;
    match store.load_by_id(task_id, step)? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("{} no checkpoint for {} / {}", "State:".yellow(), task_id, step),
    }
    Ok(())
}

fn handle_scratchpad_command(task_id: &str, step: &str, json: bool, config: &Config) -> Result<()> {
    info!("Showing scratchpad for {} / {}", task_id, step);
    let pad = Scratchpad::for_loop(config.storage.scratchpads_dir(), task_id, step, None);
    let data = pad.read()?;
    if data.is_empty() {
        println!("{} nothing recorded at {}", "Scratchpad:".yellow(), pad.path().display());
    } else if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        print!("{}", data.render());
    }
    Ok(())
}

fn handle_decision_command(
    task_id: &str,
    step: &str,
    approved: bool,
    reason: Option<&str>,
    config: &Config,
) -> Result<()> {
    info!("Recording decision for {} / {}: approved={} reason={:?}", task_id, step, approved, reason);
    let tasks = tasks_dir(config);
    let Some(mut task) = load_task(&tasks, task_id)? else {
        bail!("no saved task with id {}", task_id);
    };
    task.set_metadata(approval_key(step), approved);
    if let Some(reason) = reason {
        task.set_metadata(format!("{}:reason", approval_key(step)), reason);
    }
    save_task(&tasks, &task)?;

    if approved {
        println!("{} {} / {}", "Approved:".green(), task_id, step);
    } else {
        println!("{} {} / {}", "Rejected:".red(), task_id, step);
        if let Some(r) = reason {
            println!("  Reason: {}", r);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
