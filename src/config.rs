//! Explicit, caller-constructed configuration for a `run_graph` call.
//!
//! Mirrors the teacher's `ExecutionOptions`/`opts.rs` pattern: plain field
//! construction, no hidden globals, no environment variable reads. The
//! caller of [`crate::scheduler::run_graph`] is responsible for deciding
//! concurrency, rate limits, and prefix commands, and passing them in
//! explicitly.

use std::collections::HashMap;

use thiserror::Error;

/// Top-level knobs for a single graph run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of tasks dispatched at once, across the whole run.
    pub max_concurrency: usize,
    /// Additional limits scoped to a task name or a `task_channel` slot.
    pub rate_limits: RateLimits,
    /// Prefix commands scoped to a task name or a `task_channel` slot. A
    /// task's own `task_prefix_command` takes precedence over any of these.
    pub prefixes: PrefixConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrency: num_cpus_fallback(),
            rate_limits: RateLimits::default(),
            prefixes: PrefixConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(max_concurrency: usize) -> Self {
        EngineConfig {
            max_concurrency,
            rate_limits: RateLimits::default(),
            prefixes: PrefixConfig::default(),
        }
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_prefixes(mut self, prefixes: PrefixConfig) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Checks every slot named in `rate_limits`/`prefixes` against the set
    /// of task names and channels actually present in a built graph, per
    /// the `UsageError` policy of "unknown channel in rate_limits" being a
    /// usage error raised before any dispatch.
    pub(crate) fn validate_slots(&self, known: &std::collections::HashSet<&str>) -> Result<(), UsageError> {
        for slot in self.rate_limits.slots() {
            if !known.contains(slot.as_str()) {
                return Err(UsageError::UnknownRateLimitSlot { slot: slot.clone() });
            }
        }
        for slot in self.prefixes.slots() {
            if !known.contains(slot.as_str()) {
                return Err(UsageError::UnknownPrefixSlot { slot: slot.clone() });
            }
        }
        Ok(())
    }
}

/// Per-slot concurrency caps, keyed by the slot name a task declares via
/// `task_channel` (or its `task_name`, used bare as a slot). A slot with no
/// entry here is unlimited (bounded only by `max_concurrency`).
#[derive(Debug, Clone, Default)]
pub struct RateLimits {
    limits: HashMap<String, usize>,
}

impl RateLimits {
    pub fn new() -> Self {
        RateLimits::default()
    }

    pub fn with_limit(mut self, slot: impl Into<String>, limit: usize) -> Self {
        self.limits.insert(slot.into(), limit);
        self
    }

    pub fn limit_for(&self, slot: &str) -> Option<usize> {
        self.limits.get(slot).copied()
    }

    pub fn slots(&self) -> impl Iterator<Item = &String> {
        self.limits.keys()
    }
}

/// Prefix commands keyed by the slot name a task declares via
/// `task_channel` (or its `task_name`). Per spec §4.5, a task's own
/// `task_prefix_command` takes precedence over any slot prefix configured
/// here.
#[derive(Debug, Clone, Default)]
pub struct PrefixConfig {
    prefixes: HashMap<String, String>,
}

impl PrefixConfig {
    pub fn new() -> Self {
        PrefixConfig::default()
    }

    pub fn with_prefix(mut self, slot: impl Into<String>, command: impl Into<String>) -> Self {
        self.prefixes.insert(slot.into(), command.into());
        self
    }

    pub fn prefix_for(&self, slot: &str) -> Option<&str> {
        self.prefixes.get(slot).map(String::as_str)
    }

    pub fn slots(&self) -> impl Iterator<Item = &String> {
        self.prefixes.keys()
    }
}

/// Construction- or configuration-time misuse: not a task or IO failure,
/// but the caller asking for something the engine cannot satisfy.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error(
        "rate_limits names `{slot}`, which no task in this graph declares as its \
         task_name or a task_channel"
    )]
    UnknownRateLimitSlot { slot: String },

    #[error(
        "prefixes names `{slot}`, which no task in this graph declares as its \
         task_name or a task_channel"
    )]
    UnknownPrefixSlot { slot: String },

    #[error(
        "task `{task_name}` ({task_id}) resolved a prefix command but no SelfInvoke was \
         supplied to run_graph to reconstruct it out-of-process"
    )]
    PrefixWithoutSelfInvoke { task_name: String, task_id: String },
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
