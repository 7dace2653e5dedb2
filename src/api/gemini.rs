use crate::error::BotError;
use crate::settings::OracleSettings;
use crate::Result;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;

type OracleRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// What the oracle gave back for one prompt
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// Free text of the first candidate
    Text(String),
    /// The oracle answered without a usable candidate (error payload,
    /// blocked prompt, exhausted retries)
    Refused(String),
}

/// Gemini `generateContent` client
///
/// All clones share one rate limiter so concurrent callers respect the
/// per-minute quota together.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    rate_limiter: Arc<OracleRateLimiter>,
    retry_backoff: Duration,
}

impl GeminiClient {
    pub fn new(settings: &OracleSettings, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let rpm = NonZeroU32::new(settings.requests_per_minute)
            .ok_or_else(|| BotError::Config("oracle requests_per_minute must be positive".into()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: api_key.into(),
            rate_limiter,
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Base delay for exponential backoff on 429/5xx
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Submit a prompt and return the first candidate's text
    ///
    /// Rate limits and server errors are retried with exponential backoff.
    /// Transport failures surface as `BotError::Transport` with the URL
    /// stripped, since it carries the API key.
    pub async fn generate(&self, prompt: &str) -> Result<OracleReply> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let mut last_failure = String::from("no attempt made");

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let response = match self.client.post(&url).json(&request).send().await {
                Ok(r) => r,
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff = self.retry_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Oracle network error: {}, retrying in {:?} (attempt {}/{})",
                        e.without_url(),
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(BotError::Transport(e.without_url())),
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                last_failure = format!("oracle returned {}", status);
                if attempt < MAX_RETRIES {
                    let backoff = self.retry_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Oracle returned {}, backing off for {:?} (attempt {}/{})",
                        status,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| BotError::Transport(e.without_url()))?;

            let parsed: GenerateResponse = match serde_json::from_str(&body) {
                Ok(p) => p,
                Err(e) => {
                    return Ok(OracleReply::Refused(format!(
                        "unreadable oracle response: {}",
                        e
                    )))
                }
            };

            if let Some(err) = parsed.error {
                return Ok(OracleReply::Refused(format!(
                    "oracle error ({}): {}",
                    status, err.message
                )));
            }

            let text = parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .and_then(|c| c.parts.into_iter().next())
                .and_then(|p| p.text);

            return Ok(match text {
                Some(t) => OracleReply::Text(t),
                None => OracleReply::Refused("no AI response".to_string()),
            });
        }

        Ok(OracleReply::Refused(last_failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

    fn client_for(server: &mockito::ServerGuard) -> GeminiClient {
        let settings = OracleSettings {
            base_url: server.url(),
            request_timeout_secs: 5,
            requests_per_minute: 600,
            ..OracleSettings::default()
        };
        GeminiClient::new(&settings, "gem-key")
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_generate_returns_first_candidate_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_query(Matcher::UrlEncoded("key".into(), "gem-key".into()))
            .match_body(Matcher::PartialJsonString(
                r#"{"contents": [{"parts": [{"text": "hello"}]}]}"#.into(),
            ))
            .with_body(
                r#"{"candidates": [{"content": {"parts": [{"text": "{\"signal\": \"HOLD\"}"}]}}]}"#,
            )
            .create_async()
            .await;

        let reply = client_for(&server).generate("hello").await.unwrap();
        assert_eq!(reply, OracleReply::Text(r#"{"signal": "HOLD"}"#.to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_without_candidates_is_refused() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_body(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#)
            .create_async()
            .await;

        let reply = client_for(&server).generate("prompt").await.unwrap();
        assert!(matches!(reply, OracleReply::Refused(_)));
    }

    #[tokio::test]
    async fn test_generate_error_payload_is_refused() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": {"code": 400, "message": "API key not valid"}}"#)
            .expect(1)
            .create_async()
            .await;

        let reply = client_for(&server).generate("prompt").await.unwrap();
        match reply {
            OracleReply::Refused(reason) => {
                assert!(reason.contains("API key not valid"));
                assert!(!reason.contains("gem-key"));
            }
            other => panic!("expected refusal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let reply = client_for(&server).generate("prompt").await.unwrap();
        assert_eq!(
            reply,
            OracleReply::Refused("oracle returned 503 Service Unavailable".to_string())
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error_hides_key() {
        let settings = OracleSettings {
            // Nothing listens on port 9 locally
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 1,
            requests_per_minute: 600,
            ..OracleSettings::default()
        };
        let client = GeminiClient::new(&settings, "gem-secret")
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1));

        let err = client.generate("prompt").await.unwrap_err();
        assert!(err.is_transport());
        assert!(!err.to_string().contains("gem-secret"));
    }

    #[test]
    fn test_zero_rate_is_config_error() {
        let settings = OracleSettings {
            requests_per_minute: 0,
            ..OracleSettings::default()
        };
        assert!(matches!(
            GeminiClient::new(&settings, "k"),
            Err(BotError::Config(_))
        ));
    }
}
