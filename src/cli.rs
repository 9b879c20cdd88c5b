use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Command-line interface for selecting a dashboard feed.
#[derive(Debug, Parser)]
#[command(author, version, about = "Aggregated status feeds for an openclaw agent", long_about = None)]
pub struct Cli {
    /// Feed to emit as JSON on stdout.
    #[arg(value_enum, default_value = "usage")]
    pub feed: Feed,
    /// Path to the session store snapshot (defaults to
    /// ~/.openclaw/agents/main/sessions/sessions.json).
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pub pretty: bool,
    /// Keep running and re-emit the usage feed when the session store changes.
    #[arg(long)]
    pub watch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Feed {
    /// Token usage and cost aggregation
    Usage,
    /// Agent cron job definitions
    Cron,
    /// Recent daily activity logs
    Activity,
}
