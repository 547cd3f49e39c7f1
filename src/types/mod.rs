//! Types shared across components

use serde::{Deserialize, Serialize};

/// Priority of a cache entry or a background task
///
/// Ordered from least to most important: low priority entries are evicted
/// first and high priority tasks are dispatched first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Area of the system a suggestion is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionCategory {
    Cache,
    Memory,
    Performance,
    BackgroundTasks,
}

impl std::fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SuggestionCategory::Cache => "cache",
            SuggestionCategory::Memory => "memory",
            SuggestionCategory::Performance => "performance",
            SuggestionCategory::BackgroundTasks => "background-tasks",
        })
    }
}

/// How urgently a suggestion should be acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Actionable advice derived from current metrics
///
/// Built fresh on every query, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: SuggestionCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub actions: Vec<String>,
}

impl Suggestion {
    pub fn new(
        category: SuggestionCategory,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            title: title.into(),
            description: description.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }
}
