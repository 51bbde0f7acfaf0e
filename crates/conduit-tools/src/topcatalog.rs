//! Static top-tools catalog
//!
//! The core only depends on the catalog's *shape* (spec §4.3): a mapping
//! `appName -> { toolName -> description }` used by the router to ground
//! its LLM call. The catalog's actual contents are an operator-owned,
//! out-of-scope concern (spec §1) — this module loads them from a JSON
//! file and falls back to a small built-in default so the engine is
//! runnable without external configuration.

use std::collections::HashMap;
use std::path::Path;

/// appName -> (toolName -> description)
pub type Catalog = HashMap<String, HashMap<String, String>>;

pub trait TopToolsCatalog: Send + Sync {
    /// All app names known to the catalog
    fn apps(&self) -> Vec<String>;
    /// All tool names registered under `app_name`, or empty if unknown
    fn tools_for_app(&self, app_name: &str) -> Vec<String>;
    /// The full `appName -> {toolName -> description}` map, for prompting
    fn catalog(&self) -> &Catalog;
}

pub struct StaticTopToolsCatalog {
    catalog: Catalog,
}

impl StaticTopToolsCatalog {
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Load from a JSON file at `path`, falling back to [`Self::default_catalog`]
    /// if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => match serde_json::from_str::<Catalog>(&contents) {
                Ok(catalog) => Self { catalog },
                Err(e) => {
                    tracing::warn!(
                        "failed to parse top-tools catalog at {:?}: {} - using default",
                        path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn default_catalog() -> Catalog {
        let mut catalog = Catalog::new();

        catalog.insert(
            "GMAIL".to_string(),
            HashMap::from([
                (
                    "GMAIL_SEND_EMAIL".to_string(),
                    "Send an email to one or more recipients.".to_string(),
                ),
                (
                    "GMAIL_SEARCH_EMAILS".to_string(),
                    "Search the user's mailbox by query.".to_string(),
                ),
            ]),
        );

        catalog.insert(
            "GOOGLECALENDAR".to_string(),
            HashMap::from([
                (
                    "GOOGLECALENDAR_CREATE_EVENT".to_string(),
                    "Create a calendar event with a title, time, and attendees.".to_string(),
                ),
                (
                    "GOOGLECALENDAR_LIST_EVENTS".to_string(),
                    "List upcoming events in a date range.".to_string(),
                ),
            ]),
        );

        catalog.insert(
            "GOOGLEDOCS".to_string(),
            HashMap::from([(
                "GOOGLEDOCS_CREATE_DOCUMENT".to_string(),
                "Create a new Google Doc with a title and initial content.".to_string(),
            )]),
        );

        catalog.insert(
            "GOOGLEDRIVE".to_string(),
            HashMap::from([(
                "GOOGLEDRIVE_UPLOAD_FILE".to_string(),
                "Upload a file to Google Drive.".to_string(),
            )]),
        );

        catalog
    }
}

impl Default for StaticTopToolsCatalog {
    fn default() -> Self {
        Self {
            catalog: Self::default_catalog(),
        }
    }
}

impl TopToolsCatalog for StaticTopToolsCatalog {
    fn apps(&self) -> Vec<String> {
        self.catalog.keys().cloned().collect()
    }

    fn tools_for_app(&self, app_name: &str) -> Vec<String> {
        self.catalog
            .get(app_name)
            .map(|tools| tools.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_gmail() {
        let catalog = StaticTopToolsCatalog::default();
        assert!(catalog.apps().contains(&"GMAIL".to_string()));
        assert!(!catalog.tools_for_app("GMAIL").is_empty());
    }

    #[test]
    fn unknown_app_has_no_tools() {
        let catalog = StaticTopToolsCatalog::default();
        assert!(catalog.tools_for_app("NOTANAPP").is_empty());
    }

    #[test]
    fn load_falls_back_on_missing_file() {
        let catalog = StaticTopToolsCatalog::load("/nonexistent/path/catalog.json");
        assert!(!catalog.apps().is_empty());
    }
}
