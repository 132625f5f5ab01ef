//! Per-field metadata completeness over a run's items.

use super::normalizer::{Field, NormalizedItem};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const MAX_MISSING_SAMPLES: usize = 10;

/// An item that lacked one or more fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingSample {
    pub id: Option<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCompleteness {
    pub count: usize,
    pub percent: f64,
}

/// Finalized completeness section of the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub total_items: usize,
    pub fields: BTreeMap<String, FieldCompleteness>,
    pub missing_samples: Vec<MissingSample>,
    pub checksum_fields_present: Vec<String>,
    pub checksum_present: bool,
}

pub struct CompletenessStats {
    total_items: usize,
    counts: BTreeMap<Field, usize>,
    missing_samples: Vec<MissingSample>,
    checksum_fields: BTreeSet<String>,
    checksum_pattern: Regex,
}

impl CompletenessStats {
    pub fn new() -> Self {
        Self {
            total_items: 0,
            counts: Field::ALL.into_iter().map(|f| (f, 0)).collect(),
            missing_samples: Vec::new(),
            checksum_fields: BTreeSet::new(),
            checksum_pattern: Regex::new(r"(?i)checksum|md5|sha").expect("checksum pattern is valid"),
        }
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    /// Count one item; `raw` is scanned for checksum-like keys
    pub fn record(&mut self, item: &NormalizedItem, raw: &Value) {
        self.total_items += 1;

        let mut missing = Vec::new();
        for field in Field::ALL {
            if item.has(field) {
                *self.counts.entry(field).or_insert(0) += 1;
            } else {
                missing.push(field.name().to_string());
            }
        }
        if !missing.is_empty() && self.missing_samples.len() < MAX_MISSING_SAMPLES {
            self.missing_samples.push(MissingSample {
                id: item.id.clone(),
                missing,
            });
        }

        self.collect_checksum_fields(raw);
    }

    fn collect_checksum_fields(&mut self, raw: &Value) {
        let mut stack = vec![(String::new(), raw)];
        while let Some((prefix, node)) = stack.pop() {
            let Some(object) = node.as_object() else {
                continue;
            };
            for (key, child) in object {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                if self.checksum_pattern.is_match(key) {
                    self.checksum_fields.insert(path.clone());
                }
                if child.is_object() {
                    stack.push((path, child));
                }
            }
        }
    }

    pub fn finalize(&self) -> CompletenessReport {
        let fields = self
            .counts
            .iter()
            .map(|(field, &count)| {
                (
                    field.name().to_string(),
                    FieldCompleteness {
                        count,
                        percent: percent(count, self.total_items),
                    },
                )
            })
            .collect();

        CompletenessReport {
            total_items: self.total_items,
            fields,
            missing_samples: self.missing_samples.clone(),
            checksum_fields_present: self.checksum_fields.iter().cloned().collect(),
            checksum_present: !self.checksum_fields.is_empty(),
        }
    }
}

impl Default for CompletenessStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentage rounded to two decimals; zero when nothing was seen
fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}
