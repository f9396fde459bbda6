use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use nextcmd_core::errors::ProposerError;
use nextcmd_core::proposer::{GenerativeProposer, ProposeOptions};
use nextcmd_settings::ModelSettings;

const COMPLETIONS_PATH: &str = "/v1/completions";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for an OpenAI-compatible completions endpoint.
#[derive(Debug)]
pub struct HttpProposerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
}

impl HttpProposerConfig {
    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().map(SecretString::from),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: usize,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

/// Proposes commands by sampling continuations from a hosted model.
///
/// Each continuation is appended to the prompt, so candidates are whole
/// commands. Continuations are cut at the first newline: one candidate is
/// one command line.
pub struct HttpProposer {
    client: Client,
    endpoint: String,
    config: HttpProposerConfig,
}

impl HttpProposer {
    pub fn new(config: HttpProposerConfig) -> Result<Self, ProposerError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProposerError::Unavailable(format!("http client: {e}")))?;
        let endpoint = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            COMPLETIONS_PATH
        );
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProposerError {
        if e.is_timeout() {
            ProposerError::Timeout(self.config.request_timeout)
        } else {
            ProposerError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl GenerativeProposer for HttpProposer {
    fn name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, options), fields(model = %self.config.model))]
    async fn propose(
        &self,
        prefix: &str,
        options: &ProposeOptions,
    ) -> Result<Vec<String>, ProposerError> {
        let body = CompletionRequest {
            model: &self.config.model,
            prompt: prefix,
            n: options.num_candidates,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match ProposerError::from_status(status, body) {
                ProposerError::RateLimited { .. } => ProposerError::RateLimited { retry_after },
                other => other,
            });
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ProposerError::InvalidResponse(e.to_string()))?;

        let candidates: Vec<String> = parsed
            .choices
            .into_iter()
            .map(|choice| {
                let line = choice.text.split('\n').next().unwrap_or_default();
                format!("{prefix}{}", line.trim_end())
            })
            .collect();

        debug!(count = candidates.len(), "model proposals received");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> HttpProposerConfig {
        HttpProposerConfig {
            base_url: base_url.to_string(),
            model: "tiny-code".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn endpoint_joins_base_url() {
        let p = HttpProposer::new(config("http://localhost:8080/")).unwrap();
        assert_eq!(p.endpoint(), "http://localhost:8080/v1/completions");
        assert_eq!(p.name(), "tiny-code");
    }

    #[test]
    fn config_from_settings_wraps_key() {
        let settings = ModelSettings {
            api_key: Some("sk-test".into()),
            request_timeout_ms: 750,
            ..Default::default()
        };
        let cfg = HttpProposerConfig::from_settings(&settings);
        assert_eq!(cfg.request_timeout, Duration::from_millis(750));
        assert_eq!(cfg.api_key.unwrap().expose_secret(), "sk-test");
    }

    #[tokio::test]
    async fn continuations_are_appended_to_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "tiny-code",
                "prompt": "git ",
                "n": 3,
                "max_tokens": 50
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    {"text": "status"},
                    {"text": "commit -m fix\nls"},
                    {"text": "push  "}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = HttpProposer::new(config(&server.uri())).unwrap();
        let out = p.propose("git ", &ProposeOptions::default()).await.unwrap();
        assert_eq!(out, vec!["git status", "git commit -m fix", "git push"]);
    }

    #[tokio::test]
    async fn bearer_token_sent_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sk-abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(&server.uri());
        cfg.api_key = Some(SecretString::from("sk-abc"));
        let p = HttpProposer::new(cfg).unwrap();
        let out = p.propose("ls", &ProposeOptions::default()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let p = HttpProposer::new(config(&server.uri())).unwrap();
        let err = p.propose("ls", &ProposeOptions::default()).await.unwrap_err();
        assert!(matches!(err, ProposerError::ServerError { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let p = HttpProposer::new(config(&server.uri())).unwrap();
        let err = p.propose("ls", &ProposeOptions::default()).await.unwrap_err();
        assert_eq!(err.suggested_delay(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no"))
            .mount(&server)
            .await;

        let p = HttpProposer::new(config(&server.uri())).unwrap();
        let err = p.propose("ls", &ProposeOptions::default()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"nope\": 1}"))
            .mount(&server)
            .await;

        let p = HttpProposer::new(config(&server.uri())).unwrap();
        let err = p.propose("ls", &ProposeOptions::default()).await.unwrap_err();
        assert!(matches!(err, ProposerError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut cfg = config(&server.uri());
        cfg.request_timeout = Duration::from_millis(50);
        let p = HttpProposer::new(cfg).unwrap();
        let err = p.propose("ls", &ProposeOptions::default()).await.unwrap_err();
        assert!(matches!(err, ProposerError::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let p = HttpProposer::new(config("http://127.0.0.1:1")).unwrap();
        let err = p.propose("ls", &ProposeOptions::default()).await.unwrap_err();
        assert!(matches!(err, ProposerError::NetworkError(_)));
    }
}
