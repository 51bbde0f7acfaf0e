//! Stage 2: Analyzer (spec §4.2).
//!
//! A single structured-output LLM call producing `ComprehensiveAnalysis`,
//! grounded on `sage_agent.rs`'s `AgentResponse` signature call pattern but
//! without its correction-retry loop: spec.md mandates a *deterministic*
//! fallback on any failure, not a second LLM round.

use dspy_rs::Predict;

use crate::cache::{ttl, Cache};
use crate::config::Config;
use crate::llm::{AnalysisResponse, AnalysisResponseInput};
use crate::model::{ComprehensiveAnalysis, ConversationSummary, ExecutionStep, Message};

const ANALYSIS_INSTRUCTION: &str = "Analyze the user's request and produce a single structured \
ComprehensiveAnalysis: a confidence score, whether tool execution is required, an ordered \
execution plan, any clarification or missing information needed, recommended apps, and an \
updated conversation summary. Be conservative with confidence when the request is ambiguous.";

/// `analyze(query, history, priorSummary) -> ComprehensiveAnalysis` (spec §4.2).
pub async fn analyze(
    cache: &Cache,
    config: &Config,
    query: &str,
    history: &[Message],
    prior_summary: Option<&ConversationSummary>,
) -> ComprehensiveAnalysis {
    let cache_key = fingerprint(query, history);

    if let Ok(Some(cached)) = cache.get::<ComprehensiveAnalysis>(&cache_key).await {
        return cached;
    }

    let analysis = match run_analysis(config, query, history, prior_summary).await {
        Ok(analysis) => match analysis.validate() {
            Ok(()) => analysis,
            Err(e) => {
                tracing::warn!("analysis failed schema validation: {} - using fallback", e);
                return ComprehensiveAnalysis::fallback();
            }
        },
        Err(e) => {
            tracing::warn!("analysis call failed: {} - using fallback", e);
            return ComprehensiveAnalysis::fallback();
        }
    };

    // The fallback must never poison the cache (spec §4.2); only a
    // successfully validated analysis is cached.
    if let Err(e) = cache.set(&cache_key, &analysis, ttl::ANALYSIS).await {
        tracing::warn!("failed to cache analysis: {}", e);
    }

    analysis
}

/// Key = base64 of `query + "|" + concat(last 3 history contents truncated
/// to 50 chars each)` (spec §4.2), run through the same ASCII-safe hashing
/// as every other cache domain.
fn fingerprint(query: &str, history: &[Message]) -> String {
    let tail: String = history
        .iter()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|m| truncate(&m.content, 50))
        .collect::<Vec<_>>()
        .join("");

    Cache::hash_key("analysis", &format!("{}|{}", query, tail))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

async fn run_analysis(
    config: &Config,
    query: &str,
    history: &[Message],
    prior_summary: Option<&ConversationSummary>,
) -> anyhow::Result<ComprehensiveAnalysis> {
    crate::llm::configure_model(&config.analysis_model, analysis_api_key(config)?, 0.1, 2000).await?;

    let predictor = Predict::<AnalysisResponse>::builder()
        .instruction(ANALYSIS_INSTRUCTION)
        .build();

    let history_text = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let prior_summary_text = prior_summary
        .map(|s| serde_json::to_string(s).unwrap_or_default())
        .unwrap_or_default();

    let input = AnalysisResponseInput {
        query: query.to_string(),
        history: history_text,
        prior_summary: prior_summary_text,
    };

    let response = predictor.call(input).await?;
    to_comprehensive_analysis(response)
}

fn analysis_api_key(config: &Config) -> anyhow::Result<&str> {
    let model: crate::llm::ModelId = config.analysis_model.parse()?;
    match model.provider.as_str() {
        "openai" => config.openai_api_key.as_deref(),
        "google" => config.google_api_key.as_deref(),
        "anthropic" => config.anthropic_api_key.as_deref(),
        _ => None,
    }
    .ok_or_else(|| anyhow::anyhow!("no API key configured for provider {}", model.provider))
}

fn to_comprehensive_analysis(response: AnalysisResponse) -> anyhow::Result<ComprehensiveAnalysis> {
    let execution_steps: Vec<ExecutionStep> = if response.execution_steps_json.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&response.execution_steps_json)?
    };

    let conversation_summary = if response.conversation_summary_json.trim().is_empty() {
        ConversationSummary::empty()
    } else {
        serde_json::from_str(&response.conversation_summary_json)?
    };

    let tool_priorities = response
        .tool_priorities
        .iter()
        .filter_map(|entry| {
            let (name, priority) = entry.split_once(':')?;
            let priority: u8 = priority.trim().parse().ok()?;
            Some(crate::model::ToolPriority::new(name.trim(), priority))
        })
        .collect();

    Ok(ComprehensiveAnalysis {
        query_analysis: response.query_analysis,
        is_query_clear: response.is_query_clear,
        confidence_score: response.confidence_score.clamp(0.0, 1.0),
        requires_tool_execution: response.requires_tool_execution,
        execution_steps,
        estimated_complexity: response
            .estimated_complexity
            .parse()
            .unwrap_or(crate::model::ComplexityLevel::Low),
        requires_sequential_execution: response.requires_sequential_execution,
        needs_info_gathering: response.needs_info_gathering,
        missing_information: response.missing_information,
        search_queries: response.search_queries,
        clarification_needed: response.clarification_needed,
        can_proceed_with_defaults: response.can_proceed_with_defaults,
        conversation_summary,
        recommended_apps: response.recommended_apps,
        tool_priorities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageRole;
    use uuid::Uuid;

    fn msg(content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: MessageRole::User,
            content: content.to_string(),
            tool_calls: None,
            analysis: None,
            metadata: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn fingerprint_is_deterministic_over_last_three_messages() {
        let history = vec![msg("a"), msg("b"), msg("c"), msg("d")];
        let a = fingerprint("query", &history);
        let b = fingerprint("query", &history);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_messages_beyond_the_last_three() {
        let short = vec![msg("b"), msg("c"), msg("d")];
        let long = vec![msg("a"), msg("b"), msg("c"), msg("d")];
        assert_eq!(fingerprint("query", &short), fingerprint("query", &long));
    }

    #[test]
    fn truncate_caps_at_max_chars() {
        assert_eq!(truncate("hello world", 5), "hello");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
