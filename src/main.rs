//! Application entry point

use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod activity;
mod cli;
mod cron;
mod pricing;
mod report;
mod store;
mod watcher;

fn main() -> Result<()> {
    env_logger::init();
    let cli = cli::Cli::parse();

    match cli.feed {
        cli::Feed::Usage => run_usage(&cli),
        cli::Feed::Cron => print_json(&cron::load_cron_jobs(&cron::default_cron_dir()), cli.pretty),
        cli::Feed::Activity => print_json(
            &activity::load_activity(&activity::default_memory_dir()),
            cli.pretty,
        ),
    }
}

fn run_usage(cli: &cli::Cli) -> Result<()> {
    let path: PathBuf = cli
        .store
        .clone()
        .unwrap_or_else(store::default_store_path);

    emit_usage(&path, cli.pretty)?;
    if !cli.watch {
        return Ok(());
    }

    let pretty = cli.pretty;
    let callback_path = path.clone();
    let on_change: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        if let Err(err) = emit_usage(&callback_path, pretty) {
            // The store may be mid-rewrite; report once and keep watching.
            error!("usage feed rebuild failed: {err:#}");
        }
    });

    let mut store_watcher = watcher::StoreWatcher::new(&path, on_change)?;
    store_watcher.start()?;
    loop {
        store_watcher.process_changes();
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Build the usage feed fresh from the on-disk snapshot and print it.
fn emit_usage(path: &Path, pretty: bool) -> Result<()> {
    let snapshot = store::load_store(path)
        .with_context(|| format!("loading session store {}", path.display()))?;
    print_json(&report::build_report(&snapshot), pretty)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}
