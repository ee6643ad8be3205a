use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

use swarmq::domain::{TaskRecord, TaskSource, TaskStatus};
use swarmq::queue::{QueueService, SubmitRequest};
use swarmq::store::TaskStore;
use swarmq::swarm::{ExecutorRegistry, ShellExecutor, SwarmConfig, SwarmOrchestrator};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("swarmq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("swarmq.log");

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

fn open_queue(config: &Config) -> Result<QueueService> {
    let store = match &config.data_dir {
        Some(dir) => TaskStore::open_at(dir)?,
        None => TaskStore::open(&std::env::current_dir()?)?,
    };
    Ok(QueueService::with_config(
        Arc::new(Mutex::new(store)),
        config.queue_config(),
    ))
}

fn main() -> Result<()> {
    setup_logging()?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    run_application(&cli, &config)
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    match &cli.command {
        Commands::Submit {
            summary,
            description,
            worker_type,
            priority,
            depends_on,
            parent,
            branch,
            deadline,
            max_retries,
            source,
        } => handle_submit(
            config,
            summary,
            description.as_deref(),
            worker_type,
            *priority,
            depends_on,
            parent.as_deref(),
            branch.as_deref(),
            deadline.as_deref(),
            *max_retries,
            source,
        ),
        Commands::List { status, branch } => {
            handle_list(config, status.as_deref(), branch.as_deref())
        }
        Commands::Show { id, events } => handle_show(config, id, *events),
        Commands::Stats => handle_stats(config),
        Commands::Plan => handle_plan(config),
        Commands::Cancel { id } => handle_cancel(config, id),
        Commands::Sweep => handle_sweep(config),
        Commands::Run {
            max_concurrent,
            task_limit,
            timeout_ms,
        } => handle_run(config, *max_concurrent, *task_limit, *timeout_ms),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_submit(
    config: &Config,
    summary: &str,
    description: Option<&str>,
    worker_type: &str,
    priority: i32,
    depends_on: &[String],
    parent: Option<&str>,
    branch: Option<&str>,
    deadline: Option<&str>,
    max_retries: Option<u32>,
    source: &str,
) -> Result<()> {
    let Some(source) = TaskSource::parse(source) else {
        bail!("unknown source '{source}' (expected human, decomposition, agent, or maintenance)");
    };

    let mut request = SubmitRequest::new(summary, worker_type)
        .with_source(source)
        .with_base_priority(priority);
    if let Some(description) = description {
        request = request.with_description(description);
    }
    request.depends_on = depends_on.to_vec();
    if let Some(parent) = parent {
        request = request.with_parent(parent);
    }
    if let Some(branch) = branch {
        request = request.with_branch(branch);
    }
    if let Some(deadline) = deadline {
        let parsed = chrono::DateTime::parse_from_rfc3339(deadline)
            .with_context(|| format!("invalid deadline '{deadline}', expected RFC 3339"))?;
        request = request.with_deadline(parsed.timestamp_millis());
    }
    if let Some(max_retries) = max_retries {
        request = request.with_max_retries(max_retries);
    }

    let queue = open_queue(config)?;
    let task = queue.submit(request)?;
    println!(
        "{} {} [{}] {}",
        "Submitted:".green(),
        task.id,
        task.status,
        task.summary
    );
    Ok(())
}

fn handle_list(config: &Config, status: Option<&str>, branch: Option<&str>) -> Result<()> {
    let status = match status {
        Some(s) => match TaskStatus::parse(s) {
            Some(status) => Some(status),
            None => bail!("unknown status '{s}'"),
        },
        None => None,
    };

    let queue = open_queue(config)?;
    let tasks = queue.list(status, branch)?;
    if tasks.is_empty() {
        println!("{}", "No tasks found".dimmed());
        return Ok(());
    }

    for task in tasks {
        println!("{}", format_task_line(&task));
    }
    Ok(())
}

fn handle_show(config: &Config, id: &str, events: bool) -> Result<()> {
    let queue = open_queue(config)?;
    let Some(task) = queue.get(id)? else {
        bail!("task not found: {id}");
    };

    println!("{} {}", "Task:".cyan(), task.id);
    println!("  summary:   {}", task.summary);
    println!("  worker:    {}", task.worker_type);
    println!("  source:    {}", task.source);
    println!("  status:    {}", colored_status(&task));
    println!("  priority:  {:.2} (base {})", task.computed_priority, task.base_priority);
    println!("  retries:   {}/{}", task.retry_count, task.max_retries);
    if let Some(ref parent) = task.parent_task {
        println!("  parent:    {parent}");
    }
    if let Some(ref branch) = task.branch {
        println!("  branch:    {branch}");
    }
    if let Some(ref result) = task.result {
        println!("  result:    {result}");
    }
    if let Some(ref error) = task.last_error {
        println!("  error:     {}", error.red());
    }

    if events {
        println!("{}", "Events:".cyan());
        for event in queue.events_for(id)? {
            println!("  {} {} {}", event.created_at, event.event_type, event.payload);
        }
    }
    Ok(())
}

fn handle_stats(config: &Config) -> Result<()> {
    let queue = open_queue(config)?;
    let stats = queue.stats()?;
    println!("{}", "Queue statistics:".cyan());
    println!("  pending:   {}", stats.pending);
    println!("  blocked:   {}", stats.blocked);
    println!("  ready:     {}", stats.ready);
    println!("  running:   {}", stats.running);
    println!("  completed: {}", stats.completed);
    println!("  failed:    {}", stats.failed);
    println!("  cancelled: {}", stats.cancelled);
    println!("  total:     {}", stats.total());
    Ok(())
}

fn handle_plan(config: &Config) -> Result<()> {
    let queue = open_queue(config)?;
    let plan = queue.plan()?;

    if plan.waves.is_empty() && plan.unreachable.is_empty() {
        println!("{}", "Nothing to schedule".dimmed());
        return Ok(());
    }
    for (i, wave) in plan.waves.iter().enumerate() {
        println!("{} {}", format!("Wave {}:", i + 1).cyan(), wave.join(", "));
    }
    if !plan.unreachable.is_empty() {
        println!(
            "{} {}",
            "Unreachable:".red(),
            plan.unreachable.join(", ")
        );
    }
    Ok(())
}

fn handle_cancel(config: &Config, id: &str) -> Result<()> {
    let queue = open_queue(config)?;
    let cancelled = queue.cancel(id)?;
    println!(
        "{} {} task(s) cancelled",
        "Cancelled:".yellow(),
        cancelled.len()
    );
    for task in cancelled {
        println!("  {} {}", task.id, task.summary);
    }
    Ok(())
}

fn handle_sweep(config: &Config) -> Result<()> {
    let queue = open_queue(config)?;
    let report = queue.sweep()?;
    println!(
        "{} promoted {}, refreshed {}",
        "Sweep:".cyan(),
        report.promoted,
        report.refreshed
    );
    Ok(())
}

fn handle_run(
    config: &Config,
    max_concurrent: Option<usize>,
    task_limit: Option<usize>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let mut registry = ExecutorRegistry::new();
    registry.register("shell", Arc::new(ShellExecutor::new()));
    let registry = Arc::new(registry);

    let queue = Arc::new(open_queue(config)?);

    let mut swarm_config: SwarmConfig = config.swarm_config();
    if let Some(max_concurrent) = max_concurrent {
        swarm_config.max_concurrent = max_concurrent;
    }
    if let Some(timeout_ms) = timeout_ms {
        swarm_config.execution_timeout_ms = timeout_ms;
    }
    if task_limit.is_some() {
        swarm_config.task_limit = task_limit;
    }

    println!(
        "{} concurrency {}, limit {}",
        "Starting swarm:".cyan(),
        swarm_config.max_concurrent,
        swarm_config
            .task_limit
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );

    let mut orchestrator = SwarmOrchestrator::with_config(queue, registry, swarm_config);
    let stop = orchestrator.stop_flag();

    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after in-flight tasks");
                stop.store(true, Ordering::Relaxed);
            }
        });
        orchestrator.run().await
    })?;

    println!(
        "{} {} completed, {} failed, {} discarded, {} requeued",
        "Swarm finished:".green(),
        summary.completed,
        summary.failed,
        summary.discarded,
        summary.requeued
    );
    Ok(())
}

fn format_task_line(task: &TaskRecord) -> String {
    format!(
        "{} {:>9} p={:<6.2} [{}] {}",
        task.id,
        colored_status(task),
        task.computed_priority,
        task.worker_type,
        task.summary
    )
}

fn colored_status(task: &TaskRecord) -> ColoredString {
    match task.status {
        TaskStatus::Pending | TaskStatus::Blocked => task.status.as_str().dimmed(),
        TaskStatus::Ready => task.status.as_str().cyan(),
        TaskStatus::Running => task.status.as_str().yellow(),
        TaskStatus::Completed => task.status.as_str().green(),
        TaskStatus::Failed => task.status.as_str().red(),
        TaskStatus::Cancelled => task.status.as_str().magenta(),
    }
}
