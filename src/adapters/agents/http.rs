//! HTTP agent backend.
//!
//! Talks to a remote agent service: `POST {endpoint}/invoke` with
//! `{agent_type, session_id, preamble, prompt, history}`, answered by
//! `{response}`.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::InvocationError;
use crate::domain::models::Turn;
use crate::domain::ports::{AgentBackend, AgentBinding, AgentSession, SessionContext};

/// HTTP agent service configuration.
#[derive(Debug, Clone)]
pub struct HttpAgentConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl HttpAgentConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    agent_type: &'a str,
    session_id: &'a str,
    preamble: &'a str,
    prompt: &'a str,
    history: &'a [Turn],
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    response: String,
}

/// Builds sessions that invoke a remote agent service.
#[derive(Debug, Clone)]
pub struct HttpAgentBackend {
    config: HttpAgentConfig,
    client: Client,
}

impl HttpAgentBackend {
    pub fn new(config: HttpAgentConfig) -> Result<Self, InvocationError> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = header::HeaderValue::from_str(key)
                .map_err(|e| InvocationError::Configuration(format!("Invalid agent API key: {e}")))?;
            headers.insert("x-api-key", value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| InvocationError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn connect(&self, binding: &AgentBinding) -> Result<Box<dyn AgentSession>, InvocationError> {
        tracing::debug!(
            session_id = %binding.session_id,
            agent_type = %binding.kind,
            endpoint = %self.config.endpoint,
            "Binding HTTP agent session"
        );

        Ok(Box::new(HttpAgentSession {
            client: self.client.clone(),
            url: format!("{}/invoke", self.config.endpoint),
        }))
    }
}

struct HttpAgentSession {
    client: Client,
    url: String,
}

fn classify(err: &reqwest::Error, budget: Duration) -> InvocationError {
    if err.is_timeout() {
        InvocationError::Timeout(budget)
    } else if err.is_builder() {
        InvocationError::Configuration(err.to_string())
    } else {
        InvocationError::Invocation(err.to_string())
    }
}

#[async_trait]
impl AgentSession for HttpAgentSession {
    async fn invoke(
        &self,
        prompt: &str,
        context: &SessionContext,
        budget: Duration,
    ) -> Result<String, InvocationError> {
        let body = InvokeRequest {
            agent_type: context.kind.as_str(),
            session_id: &context.session_id,
            preamble: context.kind.preamble(),
            prompt,
            history: &context.history,
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(budget)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e, budget))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(InvocationError::Configuration(format!(
                "Agent service rejected the request ({status}): {text}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InvocationError::Invocation(format!(
                "Agent service returned {status}: {text}"
            )));
        }

        let parsed: InvokeResponse = response
            .json()
            .await
            .map_err(|e| InvocationError::Invocation(format!("Malformed agent response: {e}")))?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentKind;
    use mockito::{Matcher, Server};

    fn binding() -> AgentBinding {
        AgentBinding {
            session_id: "s1".to_string(),
            kind: AgentKind::Graph,
        }
    }

    fn context() -> SessionContext {
        SessionContext {
            session_id: "s1".to_string(),
            kind: AgentKind::Graph,
            history: Vec::new(),
        }
    }

    async fn session(url: String, api_key: Option<String>) -> Box<dyn AgentSession> {
        let backend = HttpAgentBackend::new(HttpAgentConfig::new(url).with_api_key(api_key)).unwrap();
        backend.connect(&binding()).await.unwrap()
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/invoke")
            .match_header("x-api-key", "agent-key")
            .match_body(Matcher::PartialJsonString(
                r#"{"agent_type":"graph","session_id":"s1","prompt":"who?"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"response":"Ada Lovelace"}"#)
            .create_async()
            .await;

        let session = session(server.url(), Some("agent-key".to_string())).await;
        let reply = session.invoke("who?", &context(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(reply, "Ada Lovelace");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_classification() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/invoke")
            .with_status(422)
            .with_body("unknown model")
            .expect(1)
            .create_async()
            .await;

        let session = session(server.url(), None).await;
        let err = session.invoke("x", &context(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, InvocationError::Configuration(msg) if msg.contains("unknown model")));
        mock.assert_async().await;

        let mut failing = Server::new_async().await;
        failing
            .mock("POST", "/invoke")
            .with_status(500)
            .create_async()
            .await;
        let session = self::session(failing.url(), None).await;
        let err = session.invoke("x", &context(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, InvocationError::Invocation(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invocation_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let session = session(server.url(), None).await;
        let err = session.invoke("x", &context(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, InvocationError::Invocation(_)));
    }
}
