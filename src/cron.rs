//! Cron feed: agent job definitions from `~/.openclaw/cron/*.json`.

use rayon::prelude::*;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct CronReport {
    pub jobs: Vec<Value>,
}

pub fn default_cron_dir() -> PathBuf {
    crate::store::agent_path("cron")
}

/// Read every job definition in the directory. A file that fails to parse
/// still shows up, flagged instead of dropped, so a broken definition is
/// visible on the dashboard. A missing directory is an empty feed.
pub fn load_cron_jobs(dir: &Path) -> CronReport {
    let Ok(entries) = fs::read_dir(dir) else {
        return CronReport { jobs: Vec::new() };
    };

    let files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();

    let mut jobs: Vec<(String, Value)> = files
        .par_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            let parsed = fs::read(path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
            let job = match parsed {
                Some(Value::Object(data)) => {
                    let mut out = Map::with_capacity(data.len() + 1);
                    out.insert("file".to_string(), Value::String(name.clone()));
                    out.extend(data);
                    Value::Object(out)
                }
                _ => json!({"file": name, "error": "parse error"}),
            };
            Some((name, job))
        })
        .collect();

    jobs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    CronReport {
        jobs: jobs.into_iter().map(|(_, job)| job).collect(),
    }
}
