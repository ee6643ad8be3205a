//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - submit: add a task to the queue
//! - list/show/stats/plan: inspect queue state
//! - cancel: cancel a task and its dependents
//! - sweep: run one maintenance pass
//! - run: start the swarm orchestrator

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// swarmq - dependency-aware task scheduler for agent swarms
#[derive(Parser, Debug)]
#[command(name = "swarmq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a task to the queue
    Submit {
        /// Short task summary
        summary: String,

        /// Full work description (defaults to the summary)
        #[arg(short, long)]
        description: Option<String>,

        /// Worker type tag selecting the executor
        #[arg(short = 'w', long, default_value = "shell")]
        worker_type: String,

        /// Base priority (0-10)
        #[arg(short, long, default_value_t = 5)]
        priority: i32,

        /// Prerequisite task ids (repeatable)
        #[arg(short = 'D', long = "depends-on")]
        depends_on: Vec<String>,

        /// Parent task id
        #[arg(long)]
        parent: Option<String>,

        /// Branch/grouping tag
        #[arg(short, long)]
        branch: Option<String>,

        /// Deadline as RFC 3339 (e.g. 2026-03-01T12:00:00Z)
        #[arg(long)]
        deadline: Option<String>,

        /// Retry budget
        #[arg(long)]
        max_retries: Option<u32>,

        /// Origin: human, decomposition, agent, maintenance
        #[arg(short, long, default_value = "human")]
        source: String,
    },

    /// List tasks
    List {
        /// Filter by status (pending, blocked, ready, running,
        /// completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by branch tag
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Show a task, optionally with its audit trail
    Show {
        /// Task id
        id: String,

        /// Include status transition events
        #[arg(short, long)]
        events: bool,
    },

    /// Queue statistics
    Stats,

    /// Print the batch execution plan as parallel waves
    Plan,

    /// Cancel a task and every transitive dependent
    Cancel {
        /// Task id
        id: String,
    },

    /// Run one maintenance sweep
    Sweep,

    /// Run the swarm orchestrator until drained or limited
    Run {
        /// Maximum concurrent tasks
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,

        /// Stop after this many outcomes
        #[arg(short = 'n', long)]
        task_limit: Option<usize>,

        /// Per-task execution timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}
