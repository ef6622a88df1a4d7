//! Agent kinds and the capabilities each kind publishes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// The closed set of worker kinds the pool can host.
///
/// Variants are ordered as they are scanned when looking for the least
/// loaded kind, so the derived `Ord` doubles as the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentKind {
    /// General text and data helper; the fallback kind.
    #[serde(rename = "UtilityAgent")]
    Utility,
    /// Tool invocation, search and file handling.
    #[serde(rename = "ToolAgent")]
    Tool,
    /// Storage and recall of conversational memory.
    #[serde(rename = "MemoryAgent")]
    Memory,
    /// Summaries and briefs.
    #[serde(rename = "SummaryAgent")]
    Summary,
    /// Goal inference and planning.
    #[serde(rename = "GoalAgent")]
    Goal,
    /// Emotion and sentiment analysis.
    #[serde(rename = "EmotionAgent")]
    Emotion,
    /// Coordinator over the other kinds. Constructible on request but never
    /// chosen by load-based selection.
    #[serde(rename = "MasterAgent")]
    Master,
}

impl AgentKind {
    /// Kinds eligible for heuristic selection, in scan order.
    pub const SELECTABLE: [AgentKind; 6] = [
        AgentKind::Utility,
        AgentKind::Tool,
        AgentKind::Memory,
        AgentKind::Summary,
        AgentKind::Goal,
        AgentKind::Emotion,
    ];

    /// Every kind, including the ones never selected heuristically.
    pub const ALL: [AgentKind; 7] = [
        AgentKind::Utility,
        AgentKind::Tool,
        AgentKind::Memory,
        AgentKind::Summary,
        AgentKind::Goal,
        AgentKind::Emotion,
        AgentKind::Master,
    ];

    /// The type tag used in task contexts, logs and status reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utility => "UtilityAgent",
            Self::Tool => "ToolAgent",
            Self::Memory => "MemoryAgent",
            Self::Summary => "SummaryAgent",
            Self::Goal => "GoalAgent",
            Self::Emotion => "EmotionAgent",
            Self::Master => "MasterAgent",
        }
    }

    /// Capability keywords this kind handles.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Utility => &[
                "text_processing",
                "data_formatting",
                "string_manipulation",
                "list_operations",
                "dictionary_operations",
                "file_operations",
                "json_processing",
                "utility_functions",
            ],
            Self::Tool => &[
                "task_execution",
                "tool_management",
                "workflow_processing",
                "data_transformation",
                "api_integration",
                "file_processing",
                "automation",
                "system_integration",
            ],
            Self::Memory => &[
                "memory_management",
                "data_storage",
                "information_retrieval",
                "context_management",
                "memory_optimization",
            ],
            Self::Summary => &[
                "text_summarization",
                "content_analysis",
                "key_point_extraction",
                "document_analysis",
                "data_aggregation",
                "insight_generation",
                "report_creation",
                "information_distillation",
            ],
            Self::Goal => &[
                "goal_detection",
                "intent_analysis",
                "goal_planning",
                "motivation_assessment",
                "behavioral_analysis",
                "pattern_recognition",
                "goal_tracking",
            ],
            Self::Emotion => &[
                "emotion_detection",
                "sentiment_analysis",
                "mood_tracking",
                "emotion_regulation",
                "emotional_intelligence",
                "affective_computing",
            ],
            Self::Master => &[
                "task_orchestration",
                "agent_coordination",
                "workflow_management",
                "decision_making",
            ],
        }
    }

    /// Returns true if this kind publishes `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().contains(&capability)
    }

    /// First kind, in declaration order, that publishes `capability`.
    pub fn for_capability(capability: &str) -> Option<AgentKind> {
        Self::ALL.into_iter().find(|kind| kind.has_capability(capability))
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = CoreError;

    /// Accepts the full tag (`ToolAgent`), the short name (`tool`) and the
    /// legacy `Aria`-prefixed tags, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let unprefixed = lowered.strip_prefix("aria").unwrap_or(lowered.as_str());
        let short = unprefixed.strip_suffix("agent").unwrap_or(unprefixed);

        match short {
            "utility" => Ok(Self::Utility),
            "tool" => Ok(Self::Tool),
            "memory" => Ok(Self::Memory),
            "summary" => Ok(Self::Summary),
            "goal" => Ok(Self::Goal),
            "emotion" => Ok(Self::Emotion),
            "master" => Ok(Self::Master),
            _ => Err(CoreError::UnknownAgentKind(trimmed.to_string())),
        }
    }
}
