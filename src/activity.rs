//! Activity feed: the agent's dated memory logs, newest first.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const MAX_LOGS: usize = 3;
const MAX_LOG_CHARS: usize = 3000;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub date: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub logs: Vec<ActivityLog>,
}

pub fn default_memory_dir() -> PathBuf {
    crate::store::agent_path("workspace/memory")
}

/// `YYYY-MM-DD` shape check, digits only.
fn looks_like_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && [0, 1, 2, 3, 5, 6, 8, 9]
            .iter()
            .all(|&i| b[i].is_ascii_digit())
}

/// The three most recent daily logs, each truncated to a display-sized
/// prefix. A missing directory is an empty feed.
pub fn load_activity(dir: &Path) -> ActivityReport {
    let Ok(entries) = fs::read_dir(dir) else {
        return ActivityReport { logs: Vec::new() };
    };

    let mut dates: Vec<String> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            let stem = name.strip_suffix(".md")?;
            looks_like_date(stem).then(|| stem.to_string())
        })
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.truncate(MAX_LOGS);

    let logs = dates
        .into_iter()
        .filter_map(|date| {
            let mut content = fs::read_to_string(dir.join(format!("{date}.md"))).ok()?;
            if let Some((idx, _)) = content.char_indices().nth(MAX_LOG_CHARS) {
                content.truncate(idx);
            }
            Some(ActivityLog { date, content })
        })
        .collect();

    ActivityReport { logs }
}
