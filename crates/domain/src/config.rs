//! Pipeline settings read from the environment.

use std::{collections::HashMap, env, str::FromStr};

use crate::prescriptions::{MatchConfig, StaticAlternatives};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub matching: MatchConfig,
    /// Substitutes by generic name, from `ALTERNATIVES_JSON`
    pub alternatives: HashMap<String, Vec<String>>,
    pub pharmacy_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            matching: MatchConfig::default(),
            alternatives: HashMap::new(),
            pharmacy_id: "default-pharmacy".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let alternatives = match lookup("ALTERNATIVES_JSON") {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring malformed ALTERNATIVES_JSON");
                HashMap::new()
            }),
            None => defaults.alternatives,
        };

        Self {
            matching: MatchConfig {
                match_threshold: parse_or(&lookup, "MATCH_THRESHOLD", defaults.matching.match_threshold),
                ambiguity_margin: parse_or(&lookup, "AMBIGUITY_MARGIN", defaults.matching.ambiguity_margin),
                alternative_threshold: parse_or(
                    &lookup,
                    "ALTERNATIVE_THRESHOLD",
                    defaults.matching.alternative_threshold,
                ),
            },
            alternatives,
            pharmacy_id: lookup("PHARMACY_ID").unwrap_or(defaults.pharmacy_id),
        }
    }

    pub fn alternative_lookup(&self) -> StaticAlternatives {
        StaticAlternatives::new(self.alternatives.clone())
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
