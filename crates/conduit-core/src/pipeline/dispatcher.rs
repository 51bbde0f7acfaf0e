//! Stage 4: Dispatcher (spec §4.4).
//!
//! Confidence-tier routing, the tool-calling turn and its step-budgeted
//! loop, result correlation, `$step_<id>` substitution, and response
//! composition. The tool loop is grounded on `sage_agent.rs`'s `step()`:
//! extract tool calls, execute, feed results back, repeat until a final
//! textual answer or the step budget runs out — redirected from a local
//! `ToolRegistry` to the broker's remote `execute()`.

use std::sync::Arc;

use dspy_rs::Predict;

use crate::cache::Cache;
use crate::config::Config;
use crate::connection_registry::ConnectionRegistry;
use crate::llm::{ConversationalResponse, ConversationalResponseInput, ToolDispatchResponse, ToolDispatchResponseInput};
use crate::model::{ComprehensiveAnalysis, ExecutedTool, ExecutionContext, Message};
use crate::vector::VectorCatalog;
use conduit_tools::{BrokerClient, EmbeddingClient, ExecuteResult, TopToolsCatalog, ToolDescriptor};

use super::{router, tool_preparer, ChatRequest};

const TOOL_TIER_THRESHOLD: f32 = 0.8;
const CLARIFICATION_TIER_THRESHOLD: f32 = 0.4;

pub struct DispatchOutcome {
    pub text: String,
    pub executed_tools: Vec<ExecutedTool>,
    pub required_connections: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    store: &crate::store::Store,
    cache: &Cache,
    vector_catalog: &Arc<dyn VectorCatalog>,
    broker: &BrokerClient,
    top_tools: &Arc<dyn TopToolsCatalog>,
    embeddings: &EmbeddingClient,
    connections: &ConnectionRegistry,
    config: &Config,
    request: &ChatRequest,
    analysis: &ComprehensiveAnalysis,
    history: &[Message],
) -> DispatchOutcome {
    let _ = store; // reserved for future direct lookups; stages reach the store via collaborators

    if analysis.confidence_score >= TOOL_TIER_THRESHOLD && analysis.requires_tool_execution {
        return tool_tier(
            cache,
            vector_catalog,
            broker,
            top_tools,
            embeddings,
            connections,
            config,
            request,
            analysis,
            history,
        )
        .await;
    }

    if analysis.confidence_score < CLARIFICATION_TIER_THRESHOLD {
        return conversational_tier(config, request, analysis).await;
    }

    if !analysis.clarification_needed.is_empty() {
        return clarification_tier(analysis);
    }

    simple_tier(config, request, analysis, history).await
}

#[allow(clippy::too_many_arguments)]
async fn tool_tier(
    cache: &Cache,
    vector_catalog: &Arc<dyn VectorCatalog>,
    broker: &BrokerClient,
    top_tools: &Arc<dyn TopToolsCatalog>,
    embeddings: &EmbeddingClient,
    connections: &ConnectionRegistry,
    config: &Config,
    request: &ChatRequest,
    analysis: &ComprehensiveAnalysis,
    history: &[Message],
) -> DispatchOutcome {
    let (router_apps, router_tools) =
        match router::route(cache, config, top_tools.as_ref(), &request.user_query).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("router failed: {} - falling back to recommendedApps", e);
                (analysis.recommended_apps.clone(), Vec::new())
            }
        };

    let preparation = tool_preparer::prepare(
        cache,
        vector_catalog.as_ref(),
        broker,
        embeddings,
        connections,
        analysis,
        &request.user_query,
        &request.user_id,
        &router_apps,
        &router_tools,
    )
    .await;

    if preparation.tools.is_empty() && !preparation.required_connections.is_empty() {
        return DispatchOutcome {
            text: authorization_gap_message(&preparation.required_connections),
            executed_tools: Vec::new(),
            required_connections: preparation.required_connections,
        };
    }

    let prompt = optimized_prompt(analysis, &request.user_query, history);
    let available_tools = render_tools(&preparation.tools);

    let api_key = match chat_api_key(config) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!("no chat model API key configured: {}", e);
            return DispatchOutcome {
                text: "I'm unable to reach the language model right now. Please try again shortly."
                    .to_string(),
                executed_tools: Vec::new(),
                required_connections: preparation.required_connections,
            };
        }
    };

    if let Err(e) = crate::llm::configure_model(&config.chat_model, api_key, 0.3, 3000).await {
        tracing::warn!("failed to configure chat model: {}", e);
        return DispatchOutcome {
            text: "I'm unable to reach the language model right now. Please try again shortly."
                .to_string(),
            executed_tools: Vec::new(),
            required_connections: preparation.required_connections,
        };
    }

    let by_name: std::collections::HashMap<&str, &ToolDescriptor> =
        preparation.tools.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut ctx = ExecutionContext::new();
    let mut executed = Vec::new();
    let mut step_number: u32 = 0;
    let mut last_text = String::new();

    for _ in 0..config.max_agent_steps {
        let predictor = Predict::<ToolDispatchResponse>::builder()
            .instruction(TOOL_DISPATCH_INSTRUCTION)
            .build();

        let input = ToolDispatchResponseInput {
            prompt: prompt.clone(),
            available_tools: available_tools.clone(),
        };

        let response = match predictor.call(input).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("tool dispatch call failed: {}", e);
                break;
            }
        };

        if response.tool_calls.is_empty() {
            last_text = response.final_text;
            break;
        }

        for call in response.tool_calls {
            step_number += 1;
            let Some(descriptor) = by_name.get(call.name.as_str()) else {
                tracing::warn!("model requested unknown tool {}", call.name);
                continue;
            };

            let args: serde_json::Value = serde_json::Value::Object(
                call.args
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(ctx.substitute(v))))
                    .collect(),
            );

            let account_id = preparation
                .connected_accounts
                .get(&descriptor.app_name)
                .cloned()
                .unwrap_or_default();
            let result = execute_tool(broker, descriptor, &args, &account_id, &request.user_id).await;
            ctx.record(step_number.to_string(), result.clone());

            executed.push(ExecutedTool {
                name: call.name.clone(),
                args: args.clone(),
                result,
                step_number,
            });
        }

        last_text = response.final_text;
        if !last_text.is_empty() {
            break;
        }
    }

    let text = compose_tool_response(&executed, &last_text);

    DispatchOutcome {
        text,
        executed_tools: executed,
        required_connections: preparation.required_connections,
    }
}

async fn execute_tool(
    broker: &BrokerClient,
    descriptor: &ToolDescriptor,
    args: &serde_json::Value,
    connected_account_id: &str,
    user_id: &str,
) -> serde_json::Value {
    match broker
        .execute(&descriptor.name, args, connected_account_id, user_id)
        .await
    {
        Ok(result) => execute_result_to_value(result),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

fn execute_result_to_value(result: ExecuteResult) -> serde_json::Value {
    if !result.successful {
        return serde_json::json!({
            "success": false,
            "error": result.error.unwrap_or_else(|| "tool execution failed".to_string()),
        });
    }
    result.data.unwrap_or_else(|| serde_json::json!({}))
}

/// A tool result is a failure iff it is an object containing an `error`
/// field, OR contains `success=false` (spec §4.4). Empty objects succeed.
fn is_failure(result: &serde_json::Value) -> Option<String> {
    let obj = result.as_object()?;
    if let Some(err) = obj.get("error").and_then(|v| v.as_str()) {
        return Some(err.to_string());
    }
    if obj.get("success").and_then(|v| v.as_bool()) == Some(false) {
        return Some(
            obj.get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        );
    }
    None
}

fn compose_tool_response(executed: &[ExecutedTool], final_text: &str) -> String {
    let failures: Vec<(&str, String)> = executed
        .iter()
        .filter_map(|t| is_failure(&t.result).map(|reason| (t.name.as_str(), reason)))
        .collect();

    if !failures.is_empty() {
        let names: Vec<&str> = failures.iter().map(|(name, _)| *name).collect();
        let details: Vec<String> = failures
            .iter()
            .map(|(name, reason)| format!("\"{} failed: {}\"", name, reason))
            .collect();
        return format!(
            "I attempted to complete your request, but encountered issues with: {}. Details: {}.",
            names.join(", "),
            details.join("; ")
        );
    }

    if final_text.trim().is_empty() {
        "I've completed your request.".to_string()
    } else {
        final_text.to_string()
    }
}

fn authorization_gap_message(required_connections: &[String]) -> String {
    format!(
        "This requires access to {}. Please connect the app first.",
        required_connections.join(", ")
    )
}

fn clarification_tier(analysis: &ComprehensiveAnalysis) -> DispatchOutcome {
    let text = analysis
        .clarification_needed
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n");

    DispatchOutcome {
        text,
        executed_tools: Vec::new(),
        required_connections: Vec::new(),
    }
}

async fn simple_tier(
    config: &Config,
    request: &ChatRequest,
    analysis: &ComprehensiveAnalysis,
    history: &[Message],
) -> DispatchOutcome {
    let prompt = optimized_prompt(analysis, &request.user_query, history);
    let text = run_conversational(config, &prompt, 0.4, 1500)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("simple-tier call failed: {}", e);
            "I need a bit more information to help with that.".to_string()
        });

    DispatchOutcome {
        text,
        executed_tools: Vec::new(),
        required_connections: Vec::new(),
    }
}

async fn conversational_tier(
    config: &Config,
    request: &ChatRequest,
    analysis: &ComprehensiveAnalysis,
) -> DispatchOutcome {
    let prompt = format!(
        "{}\n\nCurrent intent: {}",
        request.user_query, analysis.conversation_summary.current_intent
    );
    let text = run_conversational(config, &prompt, 0.5, 1000)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("conversational-tier call failed: {}", e);
            "Hi! How can I help you today?".to_string()
        });

    DispatchOutcome {
        text,
        executed_tools: Vec::new(),
        required_connections: Vec::new(),
    }
}

async fn run_conversational(
    config: &Config,
    prompt: &str,
    temperature: f32,
    max_tokens: u32,
) -> anyhow::Result<String> {
    let api_key = chat_api_key(config)?;
    crate::llm::configure_model(&config.chat_model, api_key, temperature, max_tokens).await?;

    let predictor = Predict::<ConversationalResponse>::builder()
        .instruction(CONVERSATIONAL_INSTRUCTION)
        .build();

    let input = ConversationalResponseInput {
        prompt: prompt.to_string(),
    };

    let response = predictor.call(input).await?;
    Ok(response.reply)
}

fn chat_api_key(config: &Config) -> anyhow::Result<&str> {
    let model: crate::llm::ModelId = config.chat_model.parse()?;
    match model.provider.as_str() {
        "openai" => config.openai_api_key.as_deref(),
        "google" => config.google_api_key.as_deref(),
        "anthropic" => config.anthropic_api_key.as_deref(),
        _ => None,
    }
    .ok_or_else(|| anyhow::anyhow!("no API key configured for provider {}", model.provider))
}

/// Current date, confidence, intent/state, ordered plan, gathered/missing/
/// key-entity digests, last two turns, and the user query (spec §4.4).
fn optimized_prompt(analysis: &ComprehensiveAnalysis, query: &str, history: &[Message]) -> String {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    let plan: Vec<String> = analysis
        .execution_steps
        .iter()
        .map(|s| format!("{}. {} ({:?})", s.step_number, s.description, s.priority))
        .collect();

    let last_two: Vec<String> = history
        .iter()
        .rev()
        .take(2)
        .rev()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect();

    format!(
        "Date: {}\nConfidence: {:.2}\nIntent: {}\nState: {:?}\nPlan:\n{}\nGathered: {}\nMissing: {}\nKey entities: {}\nRecent turns:\n{}\nQuery: {}",
        today,
        analysis.confidence_score,
        analysis.conversation_summary.current_intent,
        analysis.conversation_summary.state,
        plan.join("\n"),
        analysis.conversation_summary.contextual_details.gathered.join(", "),
        analysis.conversation_summary.contextual_details.missing.join(", "),
        analysis
            .conversation_summary
            .key_entities
            .iter()
            .map(|e| format!("{}={}", e.entity_type, e.value))
            .collect::<Vec<_>>()
            .join(", "),
        last_two.join("\n"),
        query
    )
}

fn render_tools(tools: &[ToolDescriptor]) -> String {
    tools
        .iter()
        .map(|t| format!("{}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

const TOOL_DISPATCH_INSTRUCTION: &str = "You may call any of the available tools to satisfy the \
user's request. Call tools only when needed; once you have enough information or have completed \
the task, return an empty tool_calls array and put your final reply in final_text.";

const CONVERSATIONAL_INSTRUCTION: &str =
    "Reply directly to the user's message. Do not invent tool calls or capabilities you do not have.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_failure_detects_error_field() {
        let result = serde_json::json!({ "error": "rate limited" });
        assert_eq!(is_failure(&result), Some("rate limited".to_string()));
    }

    #[test]
    fn is_failure_detects_success_false() {
        let result = serde_json::json!({ "success": false, "error": "nope" });
        assert_eq!(is_failure(&result), Some("nope".to_string()));
    }

    #[test]
    fn is_failure_treats_empty_object_as_success() {
        let result = serde_json::json!({});
        assert_eq!(is_failure(&result), None);
    }

    #[test]
    fn compose_tool_response_names_failures() {
        let executed = vec![ExecutedTool {
            name: "GMAIL_SEND_EMAIL".to_string(),
            args: serde_json::json!({}),
            result: serde_json::json!({ "error": "rate limited" }),
            step_number: 1,
        }];
        let text = compose_tool_response(&executed, "");
        assert!(text.contains("GMAIL_SEND_EMAIL"));
        assert!(text.contains("rate limited"));
    }

    #[test]
    fn compose_tool_response_uses_default_on_empty_success() {
        let text = compose_tool_response(&[], "");
        assert_eq!(text, "I've completed your request.");
    }

    #[test]
    fn compose_tool_response_prefers_model_text_when_present() {
        let text = compose_tool_response(&[], "All done, doc created.");
        assert_eq!(text, "All done, doc created.");
    }
}
