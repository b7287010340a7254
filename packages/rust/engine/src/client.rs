//! HTTP answer engine client for OpenAI-compatible chat-completions APIs
//! that report citations (Perplexity-style `citations` / `search_results`).

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use aivis_shared::{AivisError, EngineConfig, Result};

use crate::{AnswerEngine, ConnectivityReport, RawAnswer, RawCitation};

/// User-Agent string for answer engine requests.
const USER_AGENT: &str = concat!("aivis/", env!("CARGO_PKG_VERSION"));

/// Longest upstream error body kept in error messages.
const MAX_ERROR_BODY: usize = 300;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Answer engine backed by a chat-completions HTTP endpoint.
pub struct HttpAnswerEngine {
    config: EngineConfig,
    client: Client,
}

impl HttpAnswerEngine {
    /// Create a client. The config is fixed for the client's lifetime.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AivisError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Send one chat request and decode the response envelope.
    async fn chat(&self, question: &str, max_tokens: Option<u32>) -> Result<ChatResponse> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: question,
                },
            ],
            max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AivisError::Upstream {
                status: status.as_u16(),
                message: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        serde_json::from_str(&body).map_err(|e| {
            AivisError::parse(format!(
                "invalid answer engine response: {e} (got: {})",
                truncate(&body, 200)
            ))
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> AivisError {
        if e.is_timeout() {
            AivisError::Timeout(self.config.request_timeout)
        } else {
            AivisError::Network(format!("{}: {e}", self.endpoint()))
        }
    }
}

#[async_trait]
impl AnswerEngine for HttpAnswerEngine {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn ask(&self, question: &str) -> Result<RawAnswer> {
        let response = self.chat(question, None).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AivisError::parse("answer engine returned no answer text"))?;

        let citations = merge_citations(response.citations, response.search_results);
        debug!(
            answer_len = text.len(),
            citations = citations.len(),
            "answer received"
        );

        Ok(RawAnswer { text, citations })
    }

    async fn test_connectivity(&self) -> ConnectivityReport {
        let mut errors = self.config.problems();
        if !errors.is_empty() {
            warn!(?errors, "answer engine misconfigured, skipping network probe");
            return ConnectivityReport::from_errors(errors, 0);
        }

        let start = Instant::now();
        match self.chat("Reply with the single word: ok", Some(1)).await {
            Ok(_) => {}
            Err(AivisError::Upstream { status: 401 | 403, message }) => {
                errors.push(format!("answer engine rejected credentials: {message}"));
            }
            Err(e) => errors.push(e.to_string()),
        }
        let latency_ms = start.elapsed().as_millis() as u64;

        let report = ConnectivityReport::from_errors(errors, latency_ms);
        info!(
            success = report.success,
            latency_ms,
            base_url = %self.config.base_url,
            "answer engine connectivity checked"
        );
        report
    }
}

/// Combine the numbered `citations` list with `search_results`, keeping the
/// numbered order first and dropping duplicates.
fn merge_citations(urls: Vec<String>, results: Vec<SearchResult>) -> Vec<RawCitation> {
    let mut seen = HashSet::new();
    let mut merged: Vec<RawCitation> = Vec::new();

    for url in urls {
        let url = url.trim().to_string();
        if url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        merged.push(RawCitation::new(url));
    }

    for result in results {
        let url = result.url.trim().to_string();
        if url.is_empty() {
            continue;
        }
        if seen.insert(url.clone()) {
            merged.push(RawCitation {
                url,
                title: result.title,
            });
        } else if let Some(existing) = merged.iter_mut().find(|c| c.url == url) {
            if existing.title.is_none() {
                existing.title = result.title;
            }
        }
    }

    merged
}

/// Truncate to at most `max` characters.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aivis_shared::AppConfig;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn engine_for(server: &MockServer, api_key: &str) -> HttpAnswerEngine {
        let mut app = AppConfig::default();
        app.answer_engine.base_url = server.uri();
        app.answer_engine.request_timeout_secs = 5;
        HttpAnswerEngine::new(EngineConfig::with_api_key(&app, api_key)).expect("client")
    }

    fn answer_body() -> serde_json::Value {
        serde_json::json!({
            "id": "resp-1",
            "model": "sonar",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Acme Corp is a popular choice [1], though Riva is cheaper [2]."
                }
            }],
            "citations": ["https://acme.dev/blog", "https://riva.ai/compare"],
            "search_results": [
                {"title": "Riva vs Acme", "url": "https://riva.ai/compare"},
                {"title": "G2 reviews", "url": "https://g2.com/acme"}
            ]
        })
    }

    #[tokio::test]
    async fn ask_parses_answer_and_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"model": "sonar"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer_body()))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine_for(&server, "test-key");
        let answer = engine.ask("Which tools compete with Riva?").await.unwrap();

        assert!(answer.text.starts_with("Acme Corp"));
        assert_eq!(answer.citations.len(), 3);
        assert_eq!(answer.citations[0].url, "https://acme.dev/blog");
        assert_eq!(answer.citations[1].title.as_deref(), Some("Riva vs Acme"));
        assert_eq!(answer.citations[2].url, "https://g2.com/acme");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = engine_for(&server, "k").ask("q").await.unwrap_err();
        assert!(matches!(err, AivisError::Upstream { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn auth_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = engine_for(&server, "bad").ask("q").await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn empty_answer_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = engine_for(&server, "k").ask("q").await.unwrap_err();
        assert!(matches!(err, AivisError::Parse { .. }));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(answer_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut app = AppConfig::default();
        app.answer_engine.base_url = server.uri();
        let mut config = EngineConfig::with_api_key(&app, "k");
        config.request_timeout = Duration::from_millis(100);
        let engine = HttpAnswerEngine::new(config).unwrap();

        let err = engine.ask("q").await.unwrap_err();
        assert!(matches!(err, AivisError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn connectivity_succeeds_against_healthy_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"max_tokens": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer_body()))
            .expect(1)
            .mount(&server)
            .await;

        let report = engine_for(&server, "k").test_connectivity().await;
        assert!(report.success, "errors: {:?}", report.errors);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn connectivity_without_key_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer_body()))
            .expect(0)
            .mount(&server)
            .await;

        let report = engine_for(&server, "").test_connectivity().await;
        assert!(!report.success);
        assert!(report.errors[0].contains("API key"));
    }

    #[tokio::test]
    async fn connectivity_reports_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let report = engine_for(&server, "k").test_connectivity().await;
        assert!(!report.success);
        assert!(report.errors[0].contains("rejected credentials"));
    }

    #[test]
    fn merge_citations_dedupes_and_keeps_order() {
        let merged = merge_citations(
            vec!["https://a.com".into(), "https://a.com".into(), " ".into()],
            vec![
                SearchResult {
                    url: "https://a.com".into(),
                    title: Some("A".into()),
                },
                SearchResult {
                    url: "https://b.com".into(),
                    title: None,
                },
            ],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title.as_deref(), Some("A"));
        assert_eq!(merged[1].url, "https://b.com");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo", 2), "hé…");
    }
}
