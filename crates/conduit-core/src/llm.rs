//! LLM provider selection and the two structured-output signatures the
//! pipeline depends on (spec §4.2 Analyzer, §4.4 Dispatcher, §6 "Selectable
//! by identifiers of the form `<provider>:<model>`").
//!
//! Modeled as `dspy_rs::Signature`s exactly as the teacher's
//! `AgentResponse`/`CorrectionResponse` pair in `sage_agent.rs`, since the
//! teacher already solves "an LLM emits tool calls" via structured-output
//! forcing rather than a native function-calling API.

use anyhow::{Context, Result};
use dspy_rs::{configure, BamlType, ChatAdapter, LM};
use std::collections::HashMap;

// baml_bridge is needed for the BamlType derive macro expansion
#[allow(unused_imports)]
use baml_bridge;

/// A `<provider>:<model>` identifier (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    pub provider: String,
    pub model: String,
}

impl std::str::FromStr for ModelId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (provider, model) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("model id must be `<provider>:<model>`, got: {}", s))?;
        if provider.is_empty() || model.is_empty() {
            anyhow::bail!("model id must be `<provider>:<model>`, got: {}", s);
        }
        Ok(ModelId {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

/// Resolves the API base/key for a provider, mirroring the env-var naming
/// spec §6 enumerates (`OPENAI_API_KEY`, `GOOGLE_API_KEY`, ...).
pub fn provider_api_base(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "anthropic" => "https://api.anthropic.com/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Configures the global DSRs LM for a given `<provider>:<model>` id,
/// grounded on `sage_agent.rs`'s `SageAgent::configure_lm`.
pub async fn configure_model(
    model_id: &str,
    api_key: &str,
    temperature: f32,
    max_tokens: u32,
) -> Result<ModelId> {
    let parsed: ModelId = model_id.parse()?;

    let lm = LM::builder()
        .base_url(provider_api_base(&parsed.provider).to_string())
        .api_key(api_key.to_string())
        .model(parsed.model.clone())
        .temperature(temperature)
        .max_tokens(max_tokens)
        .build()
        .await
        .context("failed to configure language model")?;

    configure(lm, ChatAdapter);
    Ok(parsed)
}

/// A tool call requested by the dispatcher's tool-calling turn (spec §4.4).
#[derive(Clone, Debug, Default, BamlType)]
pub struct ToolCall {
    pub name: String,
    pub args: HashMap<String, String>,
}

/// The analysis model's structured-output signature (spec §3, §4.2). Field
/// names match `ComprehensiveAnalysis` so the response converts directly.
#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct AnalysisResponse {
    #[input(desc = "The user's current query")]
    pub query: String,

    #[input(desc = "Recent conversation history, oldest first")]
    pub history: String,

    #[input(desc = "The prior turn's conversation summary, if any")]
    pub prior_summary: String,

    #[output(desc = "Free-text analysis of what the user is asking for")]
    pub query_analysis: String,

    #[output(desc = "Whether the query is clear enough to act on")]
    pub is_query_clear: bool,

    #[output(desc = "Confidence in this analysis, 0.0 to 1.0")]
    pub confidence_score: f32,

    #[output(desc = "Whether executing external tools is required")]
    pub requires_tool_execution: bool,

    #[output(desc = "Ordered plan steps as JSON objects matching ExecutionStep")]
    pub execution_steps_json: String,

    #[output(desc = "One of: low, med, high")]
    pub estimated_complexity: String,

    #[output(desc = "Whether steps must run in dependency order")]
    pub requires_sequential_execution: bool,

    #[output(desc = "Whether more information must be gathered before acting")]
    pub needs_info_gathering: bool,

    #[output(desc = "Missing information items, one per line")]
    pub missing_information: Vec<String>,

    #[output(desc = "Search queries useful for gathering missing information")]
    pub search_queries: Vec<String>,

    #[output(desc = "Clarification questions needed from the user, if any")]
    pub clarification_needed: Vec<String>,

    #[output(desc = "Whether the turn can proceed using sensible defaults")]
    pub can_proceed_with_defaults: bool,

    #[output(desc = "Updated conversation summary as a JSON object matching ConversationSummary")]
    pub conversation_summary_json: String,

    #[output(desc = "App names (catalog keys) this request should route to")]
    pub recommended_apps: Vec<String>,

    #[output(desc = "Tool names with an integer priority 1-10, as `name:priority` pairs")]
    pub tool_priorities: Vec<String>,
}

/// The router's structured-output call (spec §4.3 `route`).
#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct RoutingResponse {
    #[input(desc = "The user's query")]
    pub query: String,

    #[input(desc = "The static top-tools catalog as `appName: tool1, tool2, ...` lines")]
    pub catalog: String,

    #[output(desc = "App names drawn from the catalog keys")]
    pub app_names: Vec<String>,

    #[output(desc = "Tool names drawn from the union of catalog entries")]
    pub tool_names: Vec<String>,
}

/// The dispatcher's tool-calling turn (spec §4.4 tool tier), grounded on
/// `sage_agent.rs`'s `AgentResponse` signature but redirected from a local
/// `ToolRegistry` to the broker's remote `execute()`.
#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct ToolDispatchResponse {
    #[input(desc = "The optimized prompt: date, confidence, intent, plan, digests, last turns, query")]
    pub prompt: String,

    #[input(desc = "Available tools as `name: description` lines")]
    pub available_tools: String,

    #[output(desc = "Reasoning about which tools to call, if any")]
    pub reasoning: String,

    #[output(desc = "Tool calls to execute this step (empty if none needed)")]
    pub tool_calls: Vec<ToolCall>,

    #[output(desc = "Final text reply once no more tool calls are needed (empty otherwise)")]
    pub final_text: String,
}

/// The no-tools conversational/clarification turn (spec §4.4).
#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct ConversationalResponse {
    #[input(desc = "The prompt for this turn")]
    pub prompt: String,

    #[output(desc = "The reply text")]
    pub reply: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_parses_provider_and_model() {
        let id: ModelId = "openai:gpt-4o-mini".parse().unwrap();
        assert_eq!(id.provider, "openai");
        assert_eq!(id.model, "gpt-4o-mini");
    }

    #[test]
    fn model_id_rejects_missing_colon() {
        assert!("gpt-4o-mini".parse::<ModelId>().is_err());
    }

    #[test]
    fn model_id_rejects_empty_parts() {
        assert!(":gpt-4o-mini".parse::<ModelId>().is_err());
        assert!("openai:".parse::<ModelId>().is_err());
    }
}
