//! Load-aware choice of worker kind for a task.
//!
//! This is a heuristic, not a classifier. The dispatcher only ever sees the
//! kind written into the task context, so any [`TypeSelector`] can be
//! swapped in through the pool builder.

use std::collections::HashMap;

use tracing::debug;

use agentpool_core::{preferred_kind, requested_capability, AgentKind, TaskContext};

/// Current load (`busy / max(total, 1)`) per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadView {
    loads: HashMap<AgentKind, f64>,
}

impl LoadView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the load of one kind.
    pub fn with_load(mut self, kind: AgentKind, load: f64) -> Self {
        self.loads.insert(kind, load);
        self
    }

    /// Load of `kind`; kinds with no instances report 0.
    pub fn load(&self, kind: AgentKind) -> f64 {
        self.loads.get(&kind).copied().unwrap_or(0.0)
    }

    /// Least loaded of `candidates`; ties go to the earliest candidate.
    pub fn least_loaded(&self, candidates: &[AgentKind]) -> AgentKind {
        let mut best = AgentKind::Utility;
        let mut best_load = f64::INFINITY;
        for &kind in candidates {
            let load = self.load(kind);
            if load < best_load {
                best = kind;
                best_load = load;
            }
        }
        best
    }
}

/// Maps a task to the kind of worker that should handle it.
pub trait TypeSelector: Send + Sync {
    fn select(&self, message: &str, context: &TaskContext, loads: &LoadView) -> AgentKind;
}

/// Keyword categories, checked in order; first match wins.
const KEYWORD_CATEGORIES: [(AgentKind, &[&str]); 5] = [
    (AgentKind::Tool, &["tool", "search", "file"]),
    (AgentKind::Memory, &["memory", "remember", "recall"]),
    (AgentKind::Summary, &["summary", "summarize", "brief"]),
    (AgentKind::Goal, &["goal", "plan", "strategy"]),
    (AgentKind::Emotion, &["emotion", "feeling", "sentiment"]),
];

/// Classify a message by case-insensitive keyword containment.
///
/// Falls back to [`AgentKind::Utility`] when nothing matches.
pub fn classify(message: &str) -> AgentKind {
    let lowered = message.to_lowercase();
    KEYWORD_CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(kind, _)| *kind)
        .unwrap_or(AgentKind::Utility)
}

/// Default selector: explicit preference, then capability, then keywords,
/// redirected to the least loaded kind when the pick is overloaded.
#[derive(Debug, Clone)]
pub struct KeywordSelector {
    load_threshold: f64,
}

impl KeywordSelector {
    pub fn new(load_threshold: f64) -> Self {
        Self { load_threshold }
    }
}

impl Default for KeywordSelector {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl TypeSelector for KeywordSelector {
    fn select(&self, message: &str, context: &TaskContext, loads: &LoadView) -> AgentKind {
        let candidate = preferred_kind(context)
            .or_else(|| requested_capability(context).and_then(AgentKind::for_capability))
            .unwrap_or_else(|| classify(message));

        let load = loads.load(candidate);
        if load < self.load_threshold {
            return candidate;
        }

        let fallback = loads.least_loaded(&AgentKind::SELECTABLE);
        debug!(
            preferred = %candidate,
            load,
            selected = %fallback,
            "Preferred kind overloaded, using least loaded kind"
        );
        fallback
    }
}
