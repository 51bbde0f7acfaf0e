//! Core error taxonomy (spec §7 Error Handling).
//!
//! Every pipeline stage returns `Result<_, CoreError>`. The dispatcher and
//! the HTTP binary match on the variant to decide retry behavior and the
//! user-facing message; internal causes are preserved via `#[source]` for
//! logging but never echoed back to the end user.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or disallowed input (e.g. empty message, unknown session)
    #[error("validation failed: {0}")]
    Validation(String),

    /// A downstream dependency (broker, LLM provider, database, cache) failed
    /// in a way that a retry could plausibly resolve
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// The analysis identified apps the user has not connected
    #[error("authorization gap for {0:?}")]
    AuthorizationGap(Vec<String>),

    /// One or more tool calls executed but the broker reported failure;
    /// pairs of (tool name, reason)
    #[error("tool failures: {0:?}")]
    ToolFailure(Vec<(String, String)>),

    /// Anything else: programmer error, invariant violation, unrecoverable state
    #[error("fatal error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl CoreError {
    /// Whether the dispatcher should attempt a bounded retry (spec §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    /// Text composed for the end user; never includes internal error detail.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Validation(msg) => msg.clone(),
            CoreError::Transient(_) => {
                "Something went wrong processing that request. Please try again.".to_string()
            }
            CoreError::AuthorizationGap(apps) => format!(
                "This requires access to {}. Please connect the app first.",
                apps.join(", ")
            ),
            CoreError::ToolFailure(failures) => {
                let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
                format!("I couldn't complete: {}.", names.join(", "))
            }
            CoreError::Fatal(_) => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
        }
    }
}

impl From<diesel::result::Error> for CoreError {
    fn from(e: diesel::result::Error) -> Self {
        CoreError::Transient(e.into())
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::Transient(e.into())
    }
}

impl From<conduit_tools::BrokerError> for CoreError {
    fn from(e: conduit_tools::BrokerError) -> Self {
        CoreError::Transient(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(CoreError::Transient(anyhow::anyhow!("x")).is_retryable());
        assert!(!CoreError::Validation("x".to_string()).is_retryable());
        assert!(!CoreError::AuthorizationGap(vec![]).is_retryable());
    }

    #[test]
    fn authorization_gap_message_names_apps() {
        let err = CoreError::AuthorizationGap(vec!["GMAIL".to_string()]);
        assert!(err.user_message().contains("GMAIL"));
    }
}
