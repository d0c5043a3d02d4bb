//! Field projection over serialized payloads.
//!
//! Runs on the `serde_json::Value` after retrieval, so it applies the same
//! way to bars, analyses and cache reports, whether they came from the cache
//! or the source.
//!
//! Rules:
//! - with `remove_meaningless_values`, object entries anywhere in the tree
//!   whose value is an empty string, `"N/A"` or `"--"` are dropped. `null` is
//!   the unavailable marker of indicator series and is never dropped.
//! - a field selection (`custom_fields`, else the endpoint's essential list
//!   when `only_essential_fields` is set) filters records: the payload object
//!   itself and every object reached through an array. A record is only
//!   filtered when it holds at least one selected key, so records of an
//!   unrelated shape pass through whole. Objects nested under a field are
//!   values, not records, and are kept as they are.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Essential bar fields: all of them.
pub const BAR_FIELDS: &[&str] = &["timestamp", "open", "high", "low", "close", "volume"];

/// Essential quote fields: everything but the intraday range.
pub const QUOTE_FIELDS: &[&str] = &[
    "symbol",
    "timestamp",
    "price",
    "volume",
    "prev_close",
    "change",
    "change_pct",
];

/// Essential analysis fields: the summary header, the per-class groups and
/// the indicator headline fields, but not full series.
pub const ANALYSIS_FIELDS: &[&str] = &[
    "data_points",
    "as_of",
    "trend",
    "momentum",
    "volatility",
    "volume",
    "votes",
    "verdict",
    "kind",
    "name",
    "current",
    "signal",
    "lines",
];

const MEANINGLESS: &[&str] = &["", "N/A", "--"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataOptimization {
    /// Master switch; when off the payload is returned untouched.
    pub enable_optimization: bool,
    pub only_essential_fields: bool,
    /// Explicit selection. Overrides `only_essential_fields` when non-empty.
    pub custom_fields: Vec<String>,
    pub remove_meaningless_values: bool,
}

impl Default for DataOptimization {
    fn default() -> Self {
        Self {
            enable_optimization: true,
            only_essential_fields: false,
            custom_fields: Vec::new(),
            remove_meaningless_values: true,
        }
    }
}

impl DataOptimization {
    /// No projection at all.
    pub fn disabled() -> Self {
        Self {
            enable_optimization: false,
            ..Self::default()
        }
    }

    pub fn essential() -> Self {
        Self {
            only_essential_fields: true,
            ..Self::default()
        }
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            custom_fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn selection<'a>(&'a self, essential: &[&'a str]) -> Option<BTreeSet<&'a str>> {
        if !self.custom_fields.is_empty() {
            Some(self.custom_fields.iter().map(String::as_str).collect())
        } else if self.only_essential_fields && !essential.is_empty() {
            Some(essential.iter().copied().collect())
        } else {
            None
        }
    }

    /// Project `value`; `essential` is the endpoint's essential field list.
    pub fn apply(&self, value: Value, essential: &[&str]) -> Value {
        if !self.enable_optimization {
            return value;
        }
        let selection = self.selection(essential);
        project(value, selection.as_ref(), self.remove_meaningless_values)
    }
}

fn is_meaningless(value: &Value) -> bool {
    matches!(value, Value::String(s) if MEANINGLESS.contains(&s.trim()))
}

fn project(value: Value, selection: Option<&BTreeSet<&str>>, clean: bool) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| project(item, selection, clean))
                .collect(),
        ),
        Value::Object(map) => Value::Object(project_record(map, selection, clean)),
        other => other,
    }
}

fn project_record(
    map: Map<String, Value>,
    selection: Option<&BTreeSet<&str>>,
    clean: bool,
) -> Map<String, Value> {
    let filter = selection.filter(|sel| map.keys().any(|k| sel.contains(k.as_str())));
    map.into_iter()
        .filter(|(_, v)| !(clean && is_meaningless(v)))
        .filter(|(k, _)| filter.map_or(true, |sel| sel.contains(k.as_str())))
        .map(|(k, v)| {
            let v = match v {
                Value::Array(_) => project(v, selection, clean),
                other => clean_value(other, clean),
            };
            (k, v)
        })
        .collect()
}

fn clean_value(value: Value, clean: bool) -> Value {
    if !clean {
        return value;
    }
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !is_meaningless(v))
                .map(|(k, v)| (k, clean_value(v, true)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| clean_value(v, true)).collect())
        }
        other => other,
    }
}
