//! Cross-component suggestion rules

use crate::cache::CacheStats;
use crate::memory::MemoryStats;
use crate::monitor::PerformanceSummary;
use crate::tasks::QueueStats;
use crate::types::{Severity, Suggestion, SuggestionCategory};

pub const MIN_CACHE_HIT_RATE: f64 = 0.7;
pub const MAX_MEMORY_USAGE: f64 = 0.8;
pub const MIN_HEALTH_SCORE: f64 = 70.0;
pub const MAX_QUEUED_TASKS: usize = 10;

/// Merge component rules with the monitor's own suggestions
///
/// Cache rules only apply once the cache has seen lookups, so a fresh cache
/// is not reported as cold.
pub fn build_suggestions(
    cache: &CacheStats,
    memory: &MemoryStats,
    summary: &PerformanceSummary,
    queue: &QueueStats,
    monitor_suggestions: Vec<Suggestion>,
) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if cache.lookups() > 0 && cache.hit_rate < MIN_CACHE_HIT_RATE {
        suggestions.push(
            Suggestion::new(
                SuggestionCategory::Cache,
                Severity::High,
                "Low cache hit rate",
                format!(
                    "Hit rate is {:.1}% over {} lookups",
                    cache.hit_rate * 100.0,
                    cache.lookups()
                ),
            )
            .with_action("Increase cache max entries or memory budget")
            .with_action("Use longer TTLs for stable data")
            .with_action("Warm the cache with frequently read keys"),
        );
    }

    if memory.usage_ratio > MAX_MEMORY_USAGE {
        suggestions.push(
            Suggestion::new(
                SuggestionCategory::Memory,
                Severity::Critical,
                "High memory pressure",
                format!(
                    "Memory usage is {:.1}% of the {} byte budget",
                    memory.usage_ratio * 100.0,
                    memory.max_heap_bytes
                ),
            )
            .with_action("Force reclamation")
            .with_action("Release pooled objects")
            .with_action("Reduce cache memory budget"),
        );
    }

    if summary.health_score < MIN_HEALTH_SCORE {
        suggestions.push(
            Suggestion::new(
                SuggestionCategory::Performance,
                Severity::High,
                "Degraded system health",
                format!("Health score is {:.0}/100", summary.health_score),
            )
            .with_action("Run an optimization cycle")
            .with_action("Review the monitor's slowest operations"),
        );
    }

    suggestions.extend(monitor_suggestions);

    if queue.queued > MAX_QUEUED_TASKS {
        suggestions.push(
            Suggestion::new(
                SuggestionCategory::BackgroundTasks,
                Severity::Medium,
                "Background queue backlog",
                format!(
                    "{} tasks queued with {}/{} workers busy",
                    queue.queued, queue.active_workers, queue.max_workers
                ),
            )
            .with_action("Increase background max workers")
            .with_action("Lower the priority of non-urgent tasks"),
        );
    }

    suggestions
}
