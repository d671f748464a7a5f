//! Per-run report options and the field safelists they are checked against.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::window::WindowBounds;

/// Options attached to every report request.
///
/// `fields`, when non-empty, is a strict allow-list: every name must appear
/// in the report's safelist or the whole request is rejected. `flush_cache`
/// forces recomputation but the fresh result is still stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub public: bool,
    pub fields: Vec<String>,
    pub search_query: Option<String>,
    pub earliest_start: Option<DateTime<Utc>>,
    pub max_interval_days: Option<i64>,
    pub flush_cache: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            public: false,
            fields: Vec::new(),
            search_query: None,
            earliest_start: None,
            max_interval_days: None,
            flush_cache: false,
        }
    }
}

impl ReportOptions {
    /// Window constraints carried by these options.
    pub fn bounds(&self) -> WindowBounds {
        WindowBounds {
            earliest_start: self.earliest_start,
            max_interval: self.max_interval_days.map(Duration::days),
        }
    }

    /// Search query normalized for matching: trimmed, lowercased, `None` if
    /// the result is empty.
    pub fn normalized_search(&self) -> Option<String> {
        self.search_query
            .as_deref()
            .map(|query| query.trim().to_lowercase())
            .filter(|query| !query.is_empty())
    }

    /// Key fragments for every option that changes output shape. The cache
    /// bypass flag is deliberately absent: a flushed run must land on the
    /// same key it refreshes.
    pub fn cache_fragments(&self) -> Vec<String> {
        let mut fragments = Vec::new();
        fragments.push(if self.public { "public" } else { "private" }.to_string());
        if !self.fields.is_empty() {
            fragments.push(self.fields.join("-"));
        }
        if let Some(search) = self.normalized_search() {
            fragments.push(search);
        }
        fragments
    }
}

/// Rejections raised while checking options against a report's safelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    UnknownFields(Vec<String>),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsError::UnknownFields(names) => {
                write!(f, "unknown report fields: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for OptionsError {}

/// One safelisted field: the value substituted when a record lacks it, and
/// whether public runs may see it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub default: Value,
    pub public: bool,
}

impl FieldSpec {
    pub fn public(default: Value) -> Self {
        Self {
            default,
            public: true,
        }
    }

    pub fn internal(default: Value) -> Self {
        Self {
            default,
            public: false,
        }
    }
}

/// The fields one report type is allowed to expose, with per-field defaults.
///
/// Kept in a `BTreeMap` so derived field lists and cache fragments come out
/// in one stable order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSafelist {
    fields: BTreeMap<String, FieldSpec>,
}

impl FieldSafelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn default_for(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|spec| &spec.default)
    }

    /// Checks every requested field against the safelist, collecting all
    /// unknown names rather than stopping at the first.
    pub fn validate(&self, options: &ReportOptions) -> Result<(), OptionsError> {
        let unknown: Vec<String> = options
            .fields
            .iter()
            .filter(|name| !self.contains(name))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(OptionsError::UnknownFields(unknown))
        }
    }

    /// The fields a run will actually emit: the requested subset (or the
    /// whole safelist when none were requested), minus internal fields on
    /// public runs. Call after `validate`.
    pub fn effective_fields(&self, options: &ReportOptions) -> Vec<String> {
        let visible = |name: &String| {
            self.fields
                .get(name)
                .map(|spec| !options.public || spec.public)
                .unwrap_or(false)
        };
        if options.fields.is_empty() {
            self.fields.keys().filter(|name| visible(name)).cloned().collect()
        } else {
            options.fields.iter().filter(|name| visible(name)).cloned().collect()
        }
    }
}

/// Implemented by each report type that exposes row-level fields.
pub trait FieldSafelisted {
    fn safelist(&self) -> FieldSafelist;
}
