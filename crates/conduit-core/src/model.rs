//! Domain types (spec §3 Data Model).
//!
//! `ComprehensiveAnalysis`, `ExecutionStep`, and `ConversationSummary` are
//! closed tagged records, not `serde_json::Value` in memory — mirroring the
//! teacher's `ScheduledTask`/`TaskPayload` split of a typed domain value
//! backed by a JSON column at the storage boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Low,
    Med,
    High,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Low => "low",
            ComplexityLevel::Med => "med",
            ComplexityLevel::High => "high",
        }
    }
}

impl FromStr for ComplexityLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "low" => Ok(ComplexityLevel::Low),
            "med" | "medium" => Ok(ComplexityLevel::Med),
            "high" => Ok(ComplexityLevel::High),
            _ => Err(anyhow::anyhow!("invalid complexity level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPriority {
    Critical,
    High,
    Med,
    Low,
}

impl StepPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPriority::Critical => "critical",
            StepPriority::High => "high",
            StepPriority::Med => "med",
            StepPriority::Low => "low",
        }
    }
}

impl FromStr for StepPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "critical" => Ok(StepPriority::Critical),
            "high" => Ok(StepPriority::High),
            "med" | "medium" => Ok(StepPriority::Med),
            "low" => Ok(StepPriority::Low),
            _ => Err(anyhow::anyhow!("invalid step priority: {}", s)),
        }
    }
}

/// A single step in the analysis's execution plan (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: u32,
    pub description: String,
    #[serde(default)]
    pub required_data: Vec<String>,
    pub app_name: Option<String>,
    pub tool_category: String,
    /// Prior step numbers this step depends on; must form a DAG (spec §9).
    #[serde(default)]
    pub dependencies: Vec<u32>,
    pub priority: StepPriority,
}

/// A recommended tool with its router-assigned priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPriority {
    pub tool_name: String,
    /// 1-10, clamped on construction (spec §3 invariant).
    pub priority: u8,
}

impl ToolPriority {
    pub fn new(tool_name: impl Into<String>, priority: u8) -> Self {
        Self {
            tool_name: tool_name.into(),
            priority: priority.clamp(1, 10),
        }
    }
}

/// A recognized entity extracted from the conversation, with confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    /// 0.0-1.0 (spec §3 invariant).
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    InformationGathering,
    ReadyToExecute,
    Executed,
    ClarificationNeeded,
    Completed,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::InformationGathering => "information_gathering",
            ConversationState::ReadyToExecute => "ready_to_execute",
            ConversationState::Executed => "executed",
            ConversationState::ClarificationNeeded => "clarification_needed",
            ConversationState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextualDetails {
    #[serde(default)]
    pub gathered: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub previous_actions: Vec<String>,
}

/// Per-session rolling summary (spec §3), overwritten each turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub current_intent: String,
    #[serde(default)]
    pub contextual_details: ContextualDetails,
    pub state: ConversationState,
    #[serde(default)]
    pub key_entities: Vec<KeyEntity>,
    pub next_expected_action: String,
    #[serde(default)]
    pub topic_shifts: Vec<String>,
}

impl ConversationSummary {
    /// The deterministic empty summary used before any turn has run.
    pub fn empty() -> Self {
        Self {
            current_intent: String::new(),
            contextual_details: ContextualDetails::default(),
            state: ConversationState::InformationGathering,
            key_entities: Vec::new(),
            next_expected_action: String::new(),
            topic_shifts: Vec::new(),
        }
    }
}

/// The per-turn structured output of the Analyzer (spec §3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveAnalysis {
    pub query_analysis: String,
    pub is_query_clear: bool,
    /// Clamped to [0,1] on construction (spec §8 invariant 2).
    pub confidence_score: f32,
    pub requires_tool_execution: bool,
    #[serde(default)]
    pub execution_steps: Vec<ExecutionStep>,
    pub estimated_complexity: ComplexityLevel,
    pub requires_sequential_execution: bool,
    pub needs_info_gathering: bool,
    #[serde(default)]
    pub missing_information: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub clarification_needed: Vec<String>,
    pub can_proceed_with_defaults: bool,
    pub conversation_summary: ConversationSummary,
    #[serde(default)]
    pub recommended_apps: Vec<String>,
    #[serde(default)]
    pub tool_priorities: Vec<ToolPriority>,
}

impl ComprehensiveAnalysis {
    /// The deterministic fallback returned on any Analyzer failure (spec §4.2).
    /// Must never poison the analysis cache.
    pub fn fallback() -> Self {
        Self {
            query_analysis: "Unable to analyze the request; falling back to a safe default."
                .to_string(),
            is_query_clear: false,
            confidence_score: 0.1,
            requires_tool_execution: false,
            execution_steps: vec![ExecutionStep {
                step_number: 1,
                description: "Ask the user to clarify or retry their request.".to_string(),
                required_data: Vec::new(),
                app_name: None,
                tool_category: "none".to_string(),
                dependencies: Vec::new(),
                priority: StepPriority::Low,
            }],
            estimated_complexity: ComplexityLevel::Low,
            requires_sequential_execution: false,
            needs_info_gathering: true,
            missing_information: Vec::new(),
            search_queries: Vec::new(),
            clarification_needed: Vec::new(),
            can_proceed_with_defaults: false,
            conversation_summary: ConversationSummary::empty(),
            recommended_apps: Vec::new(),
            tool_priorities: Vec::new(),
        }
    }

    /// Validates the schema-level invariants from spec §8 before the
    /// analysis is used downstream. Cycles in `execution_steps.dependencies`
    /// are a validation error (spec §9) that triggers the fallback.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            anyhow::bail!(
                "confidence_score out of range: {}",
                self.confidence_score
            );
        }
        for tp in &self.tool_priorities {
            if !(1..=10).contains(&tp.priority) {
                anyhow::bail!("tool priority out of range: {}", tp.priority);
            }
        }
        if topological_order(&self.execution_steps).is_none() {
            anyhow::bail!("execution_steps contain a dependency cycle");
        }
        Ok(())
    }
}

/// Computes a topological order over execution steps by `step_number`,
/// returning `None` if `dependencies` form a cycle (spec §9).
pub fn topological_order(steps: &[ExecutionStep]) -> Option<Vec<u32>> {
    use std::collections::{HashMap, HashSet};

    let by_number: HashMap<u32, &ExecutionStep> =
        steps.iter().map(|s| (s.step_number, s)).collect();
    let mut visited: HashSet<u32> = HashSet::new();
    let mut in_progress: HashSet<u32> = HashSet::new();
    let mut order = Vec::with_capacity(steps.len());

    fn visit(
        n: u32,
        by_number: &HashMap<u32, &ExecutionStep>,
        visited: &mut HashSet<u32>,
        in_progress: &mut HashSet<u32>,
        order: &mut Vec<u32>,
    ) -> bool {
        if visited.contains(&n) {
            return true;
        }
        if in_progress.contains(&n) {
            return false;
        }
        in_progress.insert(n);
        if let Some(step) = by_number.get(&n) {
            for &dep in &step.dependencies {
                if !visit(dep, by_number, visited, in_progress, order) {
                    return false;
                }
            }
        }
        in_progress.remove(&n);
        visited.insert(n);
        order.push(n);
        true
    }

    for step in steps {
        if !visit(
            step.step_number,
            &by_number,
            &mut visited,
            &mut in_progress,
            &mut order,
        ) {
            return None;
        }
    }

    Some(order)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Initiated,
    Active,
    Inactive,
    Failed,
    Expired,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Initiated => "INITIATED",
            ConnectionStatus::Active => "ACTIVE",
            ConnectionStatus::Inactive => "INACTIVE",
            ConnectionStatus::Failed => "FAILED",
            ConnectionStatus::Expired => "EXPIRED",
        }
    }

    /// Whether a connection in this state may still be used to prepare
    /// tools for a turn (spec §4.3 edge case: INITIATED is usable).
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionStatus::Initiated | ConnectionStatus::Active)
    }
}

impl FromStr for ConnectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "INITIATED" => Ok(ConnectionStatus::Initiated),
            "ACTIVE" => Ok(ConnectionStatus::Active),
            "INACTIVE" => Ok(ConnectionStatus::Inactive),
            "FAILED" => Ok(ConnectionStatus::Failed),
            "EXPIRED" => Ok(ConnectionStatus::Expired),
            _ => Err(anyhow::anyhow!("invalid connection status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(anyhow::anyhow!("invalid message role: {}", s)),
        }
    }
}

/// A normalized tool call and its result, as persisted on an assistant
/// message (spec §4.5) and as returned to the caller (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedTool {
    pub name: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub step_number: u32,
}

/// Request-scoped map of step-id to tool result (spec §3, glossary
/// `ExecutionContext`). Never persisted.
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    results: std::collections::HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step_id: impl Into<String>, result: serde_json::Value) {
        self.results.insert(step_id.into(), result);
    }

    pub fn get(&self, step_id: &str) -> Option<&serde_json::Value> {
        self.results.get(step_id)
    }

    /// Substitutes every `$step_<id>` occurrence in string args with the
    /// stored result for `<id>` (spec §4.4). Unknown references are left
    /// unchanged and logged by the caller. Hand-rolled rather than pulling
    /// in `regex` for one pattern — `regex` isn't part of the teacher's
    /// dependency stack.
    pub fn substitute(&self, value: &str) -> String {
        substitute_step_refs(value, &self.results)
    }
}

fn substitute_step_refs(
    value: &str,
    results: &std::collections::HashMap<String, serde_json::Value>,
) -> String {
    const PREFIX: &str = "$step_";
    let Some(start) = value.find(PREFIX) else {
        return value.to_string();
    };
    let id_start = start + PREFIX.len();
    let id_end = value[id_start..]
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .map(|i| id_start + i)
        .unwrap_or(value.len());
    let id = &value[id_start..id_end];

    if value[..start].is_empty() && id_end == value.len() {
        if let Some(result) = results.get(id) {
            return match result {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
        tracing::warn!("unknown step reference in substitution: $step_{}", id);
        return value.to_string();
    }

    // Non-whole-string reference: substitute textually if known, else leave unchanged.
    match results.get(id) {
        Some(result) => {
            let replacement = match result {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!(
                "{}{}{}",
                &value[..start],
                replacement,
                substitute_step_refs(&value[id_end..], results)
            )
        }
        None => {
            tracing::warn!("unknown step reference in substitution: $step_{}", id);
            value.to_string()
        }
    }
}

/// Newtype identifying a conduit user (spec §3: opaque, stable string id).
pub type UserId = String;

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: UserId,
    pub token: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub conversation_summary: Option<ConversationSummary>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<Vec<ExecutedTool>>,
    pub analysis: Option<ComprehensiveAnalysis>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppConnection {
    pub id: Uuid,
    pub user_id: UserId,
    pub app_name: String,
    pub broker_account_id: String,
    pub status: ConnectionStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_analysis_has_low_confidence_and_one_step() {
        let fallback = ComprehensiveAnalysis::fallback();
        assert_eq!(fallback.confidence_score, 0.1);
        assert!(!fallback.requires_tool_execution);
        assert_eq!(fallback.execution_steps.len(), 1);
        assert!(fallback.validate().is_ok());
    }

    #[test]
    fn tool_priority_clamps_to_valid_range() {
        assert_eq!(ToolPriority::new("x", 0).priority, 1);
        assert_eq!(ToolPriority::new("x", 99).priority, 10);
        assert_eq!(ToolPriority::new("x", 5).priority, 5);
    }

    #[test]
    fn topological_order_detects_cycle() {
        let steps = vec![
            ExecutionStep {
                step_number: 1,
                description: "a".to_string(),
                required_data: vec![],
                app_name: None,
                tool_category: "x".to_string(),
                dependencies: vec![2],
                priority: StepPriority::Med,
            },
            ExecutionStep {
                step_number: 2,
                description: "b".to_string(),
                required_data: vec![],
                app_name: None,
                tool_category: "x".to_string(),
                dependencies: vec![1],
                priority: StepPriority::Med,
            },
        ];
        assert!(topological_order(&steps).is_none());
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let steps = vec![
            ExecutionStep {
                step_number: 2,
                description: "b".to_string(),
                required_data: vec![],
                app_name: None,
                tool_category: "x".to_string(),
                dependencies: vec![1],
                priority: StepPriority::Med,
            },
            ExecutionStep {
                step_number: 1,
                description: "a".to_string(),
                required_data: vec![],
                app_name: None,
                tool_category: "x".to_string(),
                dependencies: vec![],
                priority: StepPriority::Med,
            },
        ];
        let order = topological_order(&steps).unwrap();
        let pos1 = order.iter().position(|&n| n == 1).unwrap();
        let pos2 = order.iter().position(|&n| n == 2).unwrap();
        assert!(pos1 < pos2);
    }

    #[test]
    fn substitution_replaces_whole_string_reference() {
        let mut ctx = ExecutionContext::new();
        ctx.record("1", serde_json::json!("doc-123"));
        assert_eq!(ctx.substitute("$step_1"), "doc-123");
    }

    #[test]
    fn substitution_leaves_unknown_reference_unchanged() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.substitute("$step_99"), "$step_99");
    }
}
