use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// USD per 1000 tokens for one model.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

/// Rate billed when a model identifier has no table entry.
/// Matches the Sonnet Bedrock entry below.
pub const DEFAULT_RATE: ModelRate = ModelRate {
    input: 0.003,
    output: 0.015,
};

const RATES: &[(&str, ModelRate)] = &[
    (
        "us.anthropic.claude-sonnet-4-20250514-v1:0",
        ModelRate {
            input: 0.003,
            output: 0.015,
        },
    ),
    (
        "us.anthropic.claude-haiku-4-5-20251001-v1:0",
        ModelRate {
            input: 0.00025,
            output: 0.00125,
        },
    ),
    (
        "anthropic.claude-opus-4-6-v1",
        ModelRate {
            input: 0.015,
            output: 0.075,
        },
    ),
    (
        "amazon-bedrock/us.anthropic.claude-sonnet-4-20250514-v1:0",
        ModelRate {
            input: 0.003,
            output: 0.015,
        },
    ),
    (
        "amazon-bedrock/us.anthropic.claude-haiku-4-5-20251001-v1:0",
        ModelRate {
            input: 0.00025,
            output: 0.00125,
        },
    ),
    (
        "amazon-bedrock/anthropic.claude-opus-4-6-v1",
        ModelRate {
            input: 0.015,
            output: 0.075,
        },
    ),
];

static RATE_TABLE: OnceLock<BTreeMap<&'static str, ModelRate>> = OnceLock::new();

/// The full rate table, built once. Serialized verbatim into the usage feed
/// so clients can reproduce cost figures.
pub fn rate_table() -> &'static BTreeMap<&'static str, ModelRate> {
    RATE_TABLE.get_or_init(|| RATES.iter().copied().collect())
}

/// Rate for a raw model identifier. Lookup is exact on the full identifier;
/// unknown models bill at [`DEFAULT_RATE`], so this is total.
pub fn lookup_rate(model: &str) -> ModelRate {
    rate_table().get(model).copied().unwrap_or(DEFAULT_RATE)
}

/// Cost of one session at the given rate.
#[inline]
pub fn session_cost(rate: ModelRate, input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 / 1000.0) * rate.input + (output_tokens as f64 / 1000.0) * rate.output
}
