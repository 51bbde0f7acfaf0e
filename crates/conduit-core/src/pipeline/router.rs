//! Stage 3a: Router (spec §4.3 `route`).
//!
//! Consults the static top-tools catalog with a structured-output LLM call,
//! grounded the same way as the analyzer but against a simpler schema.

use dspy_rs::Predict;

use crate::cache::{ttl, Cache};
use crate::config::Config;
use crate::llm::{RoutingResponse, RoutingResponseInput};
use conduit_tools::TopToolsCatalog;

const ROUTING_INSTRUCTION: &str = "Given the user's query and the catalog of available apps and \
tools, select the app names and tool names from the catalog most relevant to the query. Only \
return names that literally appear in the catalog.";

/// `route(query) -> (appNames[], toolNames[])` (spec §4.3). On failure,
/// falls back to `(analysis.recommendedApps, [])` — that fallback is
/// applied by the caller, since this function only knows the catalog.
pub async fn route(
    cache: &Cache,
    config: &Config,
    catalog: &dyn TopToolsCatalog,
    query: &str,
) -> anyhow::Result<(Vec<String>, Vec<String>)> {
    let cache_key = Cache::hash_key("app_routing", query);
    if let Ok(Some(cached)) = cache.get::<(Vec<String>, Vec<String>)>(&cache_key).await {
        return Ok(cached);
    }

    let catalog_text = render_catalog(catalog);

    crate::llm::configure_model(&config.analysis_model, analysis_api_key(config)?, 0.1, 500).await?;

    let predictor = Predict::<RoutingResponse>::builder()
        .instruction(ROUTING_INSTRUCTION)
        .build();

    let input = RoutingResponseInput {
        query: query.to_string(),
        catalog: catalog_text,
    };

    let response = predictor.call(input).await?;

    let valid_apps: std::collections::HashSet<String> = catalog.apps().into_iter().collect();
    let valid_tools: std::collections::HashSet<String> = valid_apps
        .iter()
        .flat_map(|app| catalog.tools_for_app(app))
        .collect();

    let app_names: Vec<String> = response
        .app_names
        .into_iter()
        .filter(|a| valid_apps.contains(a))
        .collect();
    let tool_names: Vec<String> = response
        .tool_names
        .into_iter()
        .filter(|t| valid_tools.contains(t))
        .collect();

    let result = (app_names, tool_names);
    if let Err(e) = cache.set(&cache_key, &result, ttl::APP_ROUTING).await {
        tracing::warn!("failed to cache routing result: {}", e);
    }

    Ok(result)
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

fn render_catalog(catalog: &dyn TopToolsCatalog) -> String {
    catalog
        .apps()
        .into_iter()
        .map(|app| {
            let tools = catalog.tools_for_app(&app).join(", ");
            format!("{}: {}", app, tools)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_tools::StaticTopToolsCatalog;

    #[test]
    fn render_catalog_includes_known_apps() {
        let catalog = StaticTopToolsCatalog::default();
        let rendered = render_catalog(&catalog);
        assert!(rendered.contains("GMAIL"));
    }
}
