//! Answer engine client for aivis.
//!
//! Sends probe questions to an external conversational-answer API and
//! returns the raw answer text plus the sources the API cites. Provides:
//! - [`AnswerEngine`]: the trait the orchestrator depends on
//! - [`HttpAnswerEngine`]: chat-completions client with citation support
//! - [`RetryPolicy`]: explicit bounded retry with exponential backoff

mod client;
mod retry;

pub use client::HttpAnswerEngine;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aivis_shared::Result;

/// A source reported by the answer engine for one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCitation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl RawCitation {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }
}

/// Unanalyzed answer-engine response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnswer {
    pub text: String,
    /// Cited sources in the order the engine numbers them (`[1]`, `[2]`, ...).
    pub citations: Vec<RawCitation>,
}

/// Result of the pre-flight self-test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub success: bool,
    pub errors: Vec<String>,
    pub latency_ms: u64,
}

impl ConnectivityReport {
    /// Build a report; success iff no errors were collected.
    pub fn from_errors(errors: Vec<String>, latency_ms: u64) -> Self {
        Self {
            success: errors.is_empty(),
            errors,
            latency_ms,
        }
    }
}

/// A conversational answer engine.
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    /// Ask one question. One external call; retries are the caller's policy.
    async fn ask(&self, question: &str) -> Result<RawAnswer>;

    /// Verify credentials and reachability before any paid work.
    /// Never fails; problems are reported in the returned value.
    async fn test_connectivity(&self) -> ConnectivityReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_success_tracks_errors() {
        assert!(ConnectivityReport::from_errors(vec![], 12).success);
        let failed = ConnectivityReport::from_errors(vec!["no key".into()], 0);
        assert!(!failed.success);
        assert_eq!(failed.errors, vec!["no key".to_string()]);
    }
}
