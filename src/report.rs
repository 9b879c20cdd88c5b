//! Token-usage feed: normalizes raw session records and folds them into
//! per-day, per-model and per-category cost buckets.

use crate::pricing::{self, ModelRate};
use crate::store::SessionStore;
use chrono_tz::America::New_York;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Deref;

/// Session key of the agent's primary interactive session.
const MAIN_SESSION_KEY: &str = "agent:main:main";

/// The `sessions` list is capped for diagnostic display.
const SESSION_LIST_CAP: usize = 50;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LenientU64(pub u64);

impl<'de> serde::Deserialize<'de> for LenientU64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Visitor;
        struct LenientVisitor;
        impl<'de> Visitor<'de> for LenientVisitor {
            type Value = u64;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an integer, a float or a numeric string")
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v)
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(v.max(0) as u64)
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(if v.is_finite() && v > 0.0 { v as u64 } else { 0 })
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(v.parse::<u64>().unwrap_or(0))
            }
        }
        deserializer.deserialize_any(LenientVisitor).map(LenientU64)
    }
}

impl Deref for LenientU64 {
    type Target = u64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LenientI64(pub i64);

impl<'de> serde::Deserialize<'de> for LenientI64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Visitor;
        struct LenientVisitor;
        impl<'de> Visitor<'de> for LenientVisitor {
            type Value = i64;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an integer, a float or a numeric string")
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(v)
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v.min(i64::MAX as u64) as i64)
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(if v.is_finite() { v as i64 } else { 0 })
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(v.parse::<i64>().unwrap_or(0))
            }
        }
        deserializer.deserialize_any(LenientVisitor).map(LenientI64)
    }
}

impl Deref for LenientI64 {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LenientString(pub String);

impl<'de> serde::Deserialize<'de> for LenientString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Visitor;
        struct LenientVisitor;
        impl<'de> Visitor<'de> for LenientVisitor {
            type Value = String;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a number")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(v)
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
        }
        deserializer
            .deserialize_any(LenientVisitor)
            .map(LenientString)
    }
}

/// One session entry as stored on disk. Every field is optional; missing or
/// malformed values default rather than fail.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawSession {
    #[serde(default)]
    pub(crate) label: Option<LenientString>,
    #[serde(default)]
    pub(crate) model: Option<LenientString>,
    #[serde(default)]
    pub(crate) input_tokens: Option<LenientU64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<LenientU64>,
    #[serde(default)]
    pub(crate) total_tokens: Option<LenientU64>,
    #[serde(default)]
    pub(crate) updated_at: Option<LenientI64>,
}

/// Fully-populated session record as exposed in the feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_key: String,
    pub session_type: String,
    pub label: String,
    /// Display model name (`Haiku`/`Sonnet`/`Opus` or the identifier tail).
    pub model: String,
    /// Raw model identifier; rate lookups use this, never the display name.
    pub model_full: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub updated_at: i64,
    /// `YYYY-MM-DD` in America/New_York, or `unknown`.
    pub date: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub sessions: u64,
    pub cost: f64,
}

impl BucketTotals {
    #[inline]
    fn add(&mut self, rec: &SessionRecord, cost: f64) {
        self.input_tokens += rec.input_tokens;
        self.output_tokens += rec.output_tokens;
        self.sessions += 1;
        self.cost += cost;
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub sessions: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub sessions: u64,
    pub cost: f64,
    pub models: BTreeMap<String, BucketTotals>,
    pub types: BTreeMap<String, BucketTotals>,
}

#[derive(Default)]
struct DayAcc {
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    sessions: u64,
    cost: f64,
    models: FxHashMap<String, BucketTotals>,
    types: FxHashMap<String, BucketTotals>,
}

/// The complete usage feed, serialized to the dashboard as one JSON document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub totals: Totals,
    pub by_date: Vec<DayBucket>,
    pub by_model: BTreeMap<String, BucketTotals>,
    pub by_type: BTreeMap<String, BucketTotals>,
    pub sessions: Vec<SessionRecord>,
    pub model_costs: &'static BTreeMap<&'static str, ModelRate>,
}

/// Classify a session by its key, falling back to the stored label.
/// Key patterns win over the label.
fn session_category(key: &str, label: Option<&str>) -> String {
    if key.contains(":cron:") {
        "Cron Job".into()
    } else if key.contains(":discord:") {
        "Discord".into()
    } else if key.contains(":telegram:") {
        "Telegram".into()
    } else if key == MAIN_SESSION_KEY {
        "Main Session".into()
    } else if let Some(label) = label.filter(|l| !l.is_empty()) {
        label.into()
    } else {
        "Other".into()
    }
}

fn display_model_name(model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    if lower.contains("haiku") {
        "Haiku".into()
    } else if lower.contains("sonnet") {
        "Sonnet".into()
    } else if lower.contains("opus") {
        "Opus".into()
    } else {
        model
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(model)
            .to_string()
    }
}

/// Calendar date of an epoch-millisecond timestamp in the America/New_York
/// civil calendar, so late-UTC activity lands on the local US day.
#[inline]
fn bucket_date(updated_at: i64) -> String {
    if updated_at == 0 {
        return "unknown".into();
    }
    chrono::DateTime::from_timestamp_millis(updated_at)
        .map(|dt| dt.with_timezone(&New_York).format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Normalize one raw store entry. Never fails: a value that is not even an
/// object yields an all-defaults record, still categorized by its key.
fn normalize(key: &str, value: &Value) -> SessionRecord {
    let raw = RawSession::deserialize(value).unwrap_or_default();

    let label = raw.label.map(|s| s.0).filter(|s| !s.is_empty());
    let model_full = raw
        .model
        .map(|s| s.0)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let updated_at = raw.updated_at.map(|v| *v).unwrap_or(0);

    SessionRecord {
        session_key: key.to_string(),
        session_type: session_category(key, label.as_deref()),
        label: label.unwrap_or_else(|| key.to_string()),
        model: display_model_name(&model_full),
        model_full,
        input_tokens: raw.input_tokens.map(|v| *v).unwrap_or(0),
        output_tokens: raw.output_tokens.map(|v| *v).unwrap_or(0),
        total_tokens: raw.total_tokens.map(|v| *v).unwrap_or(0),
        updated_at,
        date: bucket_date(updated_at),
    }
}

/// Build the usage feed from a store snapshot. Pure and single-pass: per
/// record the cost is computed once against the rate table and the identical
/// value accumulated into every bucket the record belongs to, so mixed-model
/// buckets stay exact.
pub fn build_report(store: &SessionStore) -> UsageReport {
    let mut records: Vec<SessionRecord> = store
        .iter()
        .map(|(key, value)| normalize(key, value))
        .collect();

    let mut totals = Totals::default();
    let mut days: FxHashMap<String, DayAcc> =
        FxHashMap::with_capacity_and_hasher(records.len() / 4 + 1, Default::default());
    let mut by_model: FxHashMap<String, BucketTotals> = FxHashMap::default();
    let mut by_type: FxHashMap<String, BucketTotals> = FxHashMap::default();

    for rec in &records {
        let rate = pricing::lookup_rate(&rec.model_full);
        let cost = pricing::session_cost(rate, rec.input_tokens, rec.output_tokens);

        totals.input_tokens += rec.input_tokens;
        totals.output_tokens += rec.output_tokens;
        totals.total_tokens += rec.total_tokens;
        totals.sessions += 1;
        totals.cost += cost;

        let day = days.entry(rec.date.clone()).or_default();
        day.input_tokens += rec.input_tokens;
        day.output_tokens += rec.output_tokens;
        day.total_tokens += rec.total_tokens;
        day.sessions += 1;
        day.cost += cost;
        day.models.entry(rec.model.clone()).or_default().add(rec, cost);
        day.types
            .entry(rec.session_type.clone())
            .or_default()
            .add(rec, cost);

        by_model.entry(rec.model.clone()).or_default().add(rec, cost);
        by_type
            .entry(rec.session_type.clone())
            .or_default()
            .add(rec, cost);
    }

    let mut by_date: Vec<DayBucket> = days
        .into_iter()
        .map(|(date, acc)| DayBucket {
            date,
            input_tokens: acc.input_tokens,
            output_tokens: acc.output_tokens,
            total_tokens: acc.total_tokens,
            sessions: acc.sessions,
            cost: acc.cost,
            models: acc.models.into_iter().collect(),
            types: acc.types.into_iter().collect(),
        })
        .collect();
    by_date.sort_unstable_by(|a, b| b.date.cmp(&a.date));

    records.sort_unstable_by(|a, b| b.updated_at.cmp(&a.updated_at));
    records.truncate(SESSION_LIST_CAP);

    UsageReport {
        totals,
        by_date,
        by_model: by_model.into_iter().collect(),
        by_type: by_type.into_iter().collect(),
        sessions: records,
        model_costs: pricing::rate_table(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SONNET_BEDROCK: &str = "us.anthropic.claude-sonnet-4-20250514-v1:0";
    const OPUS: &str = "anthropic.claude-opus-4-6-v1";

    /// 2024-06-01 12:00 ET (EDT, UTC-4).
    const TS_JUN1_NOON_ET: i64 = 1_717_257_600_000;
    /// 2024-06-02 02:30 UTC, still 2024-06-01 in New York.
    const TS_JUN2_0230_UTC: i64 = 1_717_295_400_000;
    /// 2024-01-15 03:00 UTC, which is 2024-01-14 22:00 EST.
    const TS_JAN15_0300_UTC: i64 = 1_705_287_600_000;

    fn store_from(value: serde_json::Value) -> crate::store::SessionStore {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn main_session_scenario() {
        let store = store_from(json!({
            "agent:main:main": {
                "model": SONNET_BEDROCK,
                "inputTokens": 1000,
                "outputTokens": 500,
                "totalTokens": 1500,
                "updatedAt": TS_JUN1_NOON_ET,
            }
        }));
        let report = build_report(&store);

        assert!((report.totals.cost - 0.0105).abs() < 1e-12);
        assert_eq!(report.totals.sessions, 1);
        assert_eq!(report.totals.input_tokens, 1000);
        assert_eq!(report.totals.total_tokens, 1500);

        assert_eq!(report.by_date.len(), 1);
        assert_eq!(report.by_date[0].date, "2024-06-01");

        let rec = &report.sessions[0];
        assert_eq!(rec.session_type, "Main Session");
        assert_eq!(rec.model, "Sonnet");
        assert_eq!(rec.model_full, SONNET_BEDROCK);
    }

    #[test]
    fn empty_store_yields_empty_report() {
        let report = build_report(&store_from(json!({})));
        assert_eq!(report.totals.sessions, 0);
        assert_eq!(report.totals.cost, 0.0);
        assert!(report.by_date.is_empty());
        assert!(report.by_model.is_empty());
        assert!(report.by_type.is_empty());
        assert!(report.sessions.is_empty());
    }

    #[test]
    fn key_patterns_win_over_label() {
        assert_eq!(
            session_category("agent:x:cron:nightly", Some("My Cron")),
            "Cron Job"
        );
        assert_eq!(session_category("agent:x:discord:123", None), "Discord");
        assert_eq!(session_category("agent:x:telegram:456", None), "Telegram");
        assert_eq!(session_category("agent:main:main", Some("ignored")), "Main Session");
        assert_eq!(session_category("agent:misc", Some("Research")), "Research");
        assert_eq!(session_category("agent:misc", None), "Other");
        assert_eq!(session_category("agent:misc", Some("")), "Other");
    }

    #[test]
    fn display_names() {
        assert_eq!(display_model_name("us.anthropic.claude-HAIKU-4"), "Haiku");
        assert_eq!(display_model_name(SONNET_BEDROCK), "Sonnet");
        assert_eq!(display_model_name(OPUS), "Opus");
        assert_eq!(display_model_name("meta/llama-3-70b"), "llama-3-70b");
        assert_eq!(display_model_name("mystery-model"), "mystery-model");
        assert_eq!(display_model_name("trailing/"), "trailing/");
    }

    #[test]
    fn dates_bucket_in_new_york() {
        assert_eq!(bucket_date(TS_JUN1_NOON_ET), "2024-06-01");
        // Late-UTC activity falls on the previous US day.
        assert_eq!(bucket_date(TS_JUN2_0230_UTC), "2024-06-01");
        // EST (winter) offset is honored too.
        assert_eq!(bucket_date(TS_JAN15_0300_UTC), "2024-01-14");
        assert_eq!(bucket_date(0), "unknown");
    }

    #[test]
    fn unknown_model_bills_at_default_rate() {
        let store = store_from(json!({
            "agent:misc": {
                "model": "never-heard-of-it",
                "inputTokens": 1000,
                "updatedAt": TS_JUN1_NOON_ET,
            }
        }));
        let report = build_report(&store);
        assert!((report.totals.cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn by_date_sorted_descending() {
        let store = store_from(json!({
            "a": {"updatedAt": TS_JAN15_0300_UTC},
            "b": {"updatedAt": TS_JUN1_NOON_ET},
            "c": {"updatedAt": TS_JUN2_0230_UTC},
            "d": {},
        }));
        let report = build_report(&store);
        let dates: Vec<&str> = report.by_date.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["unknown", "2024-06-01", "2024-01-14"]);
    }

    #[test]
    fn same_day_mixed_models_stay_exact() {
        let store = store_from(json!({
            "agent:main:main": {
                "model": SONNET_BEDROCK,
                "inputTokens": 1000,
                "outputTokens": 500,
                "updatedAt": TS_JUN1_NOON_ET,
            },
            "agent:x:cron:daily": {
                "model": OPUS,
                "inputTokens": 2000,
                "outputTokens": 100,
                "updatedAt": TS_JUN2_0230_UTC,
            }
        }));
        let report = build_report(&store);

        assert_eq!(report.by_date.len(), 1);
        let day = &report.by_date[0];
        assert_eq!(day.sessions, 2);
        assert_eq!(day.models.len(), 2);

        // Nested model costs sum to the day's own cost (per-session cost is
        // accumulated, never re-derived from bucket token sums).
        let nested: f64 = day.models.values().map(|b| b.cost).sum();
        assert!((nested - day.cost).abs() < 1e-12);

        let opus_cost = 2.0 * 0.015 + 0.1 * 0.075;
        let sonnet_cost = 0.0105;
        assert!((day.cost - (opus_cost + sonnet_cost)).abs() < 1e-12);

        assert_eq!(day.types.len(), 2);
        assert!(day.types.contains_key("Cron Job"));
        assert!(day.types.contains_key("Main Session"));
    }

    #[test]
    fn bucket_sums_match_grand_totals() {
        let store = store_from(json!({
            "agent:main:main": {"model": SONNET_BEDROCK, "inputTokens": 10, "outputTokens": 20, "updatedAt": TS_JUN1_NOON_ET},
            "agent:a:cron:x": {"model": OPUS, "inputTokens": 30, "outputTokens": 40, "updatedAt": TS_JAN15_0300_UTC},
            "agent:b:discord:1": {"inputTokens": 50, "outputTokens": 60},
            "agent:c:telegram:2": {"model": "odd/one", "inputTokens": 70, "outputTokens": 80, "updatedAt": TS_JUN2_0230_UTC},
        }));
        let report = build_report(&store);

        let date_cost: f64 = report.by_date.iter().map(|d| d.cost).sum();
        assert!((date_cost - report.totals.cost).abs() < 1e-9);

        let date_sessions: u64 = report.by_date.iter().map(|d| d.sessions).sum();
        assert_eq!(date_sessions, report.totals.sessions);

        let model_cost: f64 = report.by_model.values().map(|b| b.cost).sum();
        assert!((model_cost - report.totals.cost).abs() < 1e-9);

        let type_cost: f64 = report.by_type.values().map(|b| b.cost).sum();
        assert!((type_cost - report.totals.cost).abs() < 1e-9);
    }

    #[test]
    fn session_list_capped_and_most_recent_first() {
        let mut entries = serde_json::Map::new();
        for i in 0..60 {
            entries.insert(
                format!("agent:x:cron:{i}"),
                json!({"inputTokens": i, "updatedAt": TS_JUN1_NOON_ET + i * 1000}),
            );
        }
        let report = build_report(&store_from(Value::Object(entries)));

        assert_eq!(report.sessions.len(), SESSION_LIST_CAP);
        assert_eq!(report.totals.sessions, 60);
        assert!(report
            .sessions
            .windows(2)
            .all(|w| w[0].updated_at >= w[1].updated_at));
        assert_eq!(report.sessions[0].updated_at, TS_JUN1_NOON_ET + 59_000);
    }

    #[test]
    fn malformed_fields_default_silently() {
        let store = store_from(json!({
            "agent:misc": {
                "model": SONNET_BEDROCK,
                "inputTokens": "1000",
                "outputTokens": "garbage",
                "totalTokens": null,
                "updatedAt": "not a timestamp",
                "label": 42,
            }
        }));
        let report = build_report(&store);
        let rec = &report.sessions[0];
        assert_eq!(rec.input_tokens, 1000);
        assert_eq!(rec.output_tokens, 0);
        assert_eq!(rec.total_tokens, 0);
        assert_eq!(rec.date, "unknown");
        assert_eq!(rec.label, "42");
        // Cost still accrues for the parseable half.
        assert!((report.totals.cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn non_object_record_degrades_to_defaults() {
        let store = store_from(json!({
            "agent:x:cron:broken": "not an object"
        }));
        let report = build_report(&store);
        let rec = &report.sessions[0];
        assert_eq!(rec.session_type, "Cron Job");
        assert_eq!(rec.model_full, "unknown");
        assert_eq!(rec.model, "unknown");
        assert_eq!(rec.input_tokens, 0);
        assert_eq!(rec.date, "unknown");
        assert_eq!(report.totals.cost, 0.0);
    }

    #[test]
    fn stored_total_tokens_is_trusted() {
        let store = store_from(json!({
            "agent:misc": {"inputTokens": 10, "outputTokens": 10, "totalTokens": 999}
        }));
        let report = build_report(&store);
        assert_eq!(report.totals.total_tokens, 999);
    }

    #[test]
    fn report_serializes_with_dashboard_field_names() {
        let store = store_from(json!({
            "agent:main:main": {
                "model": SONNET_BEDROCK,
                "inputTokens": 1,
                "outputTokens": 1,
                "updatedAt": TS_JUN1_NOON_ET,
            }
        }));
        let value = serde_json::to_value(build_report(&store)).unwrap();
        assert!(value.get("byDate").is_some());
        assert!(value.get("byModel").is_some());
        assert!(value.get("byType").is_some());
        assert!(value.get("modelCosts").is_some());
        assert!(value["totals"].get("inputTokens").is_some());
        assert!(value["sessions"][0].get("sessionKey").is_some());
        assert!(value["sessions"][0].get("modelFull").is_some());
        assert!(value["modelCosts"][SONNET_BEDROCK].get("input").is_some());
    }
}
