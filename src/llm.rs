use crate::config::Config;
use crate::streaming::{FragmentSender, FragmentStream, SseBuffer};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

/// Failures surfaced by a model client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Credentials missing or the client could not be built
    #[error("{0}")]
    Configuration(String),
    /// Network, provider or response-format failure while sending or streaming
    #[error("{0}")]
    Transport(String),
}

/// Conversational model session.
///
/// Implementations keep the context of every completed exchange, so callers
/// only ever send the new user text.
pub trait ModelClient: Send {
    /// Open the session if it is not open yet
    fn connect(&mut self) -> Result<(), ModelError>;

    /// Send one user turn and return the reply as a lazy fragment stream.
    ///
    /// Connection failures come back as the first item of the stream.
    fn send_turn(&mut self, text: &str) -> FragmentStream;

    /// Model identifier used for every turn
    fn model(&self) -> &str;
}

/// Message content in the Gemini wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Content {
    fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }

    fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Fixed per-session settings
#[derive(Debug, Clone)]
struct ClientSettings {
    model: String,
    base_url: String,
    system_instruction: String,
    api_key: Option<String>,
    api_key_env: String,
    connect_timeout: Duration,
}

/// Live connection state, created on first use
struct GeminiSession {
    http: reqwest::Client,
    api_key: String,
    history: Arc<Mutex<Vec<Content>>>,
}

/// Streaming client for the Gemini `streamGenerateContent` endpoint
pub struct GeminiClient {
    settings: ClientSettings,
    session: Option<GeminiSession>,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        let settings = ClientSettings {
            model: config.model.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            system_instruction: config.system_instruction().to_string(),
            api_key: config.api_key.clone(),
            api_key_env: config.api_key_env.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        };

        Self {
            settings,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&GeminiSession, ModelError> {
        if self.session.is_none() {
            self.session = Some(Self::open_session(&self.settings)?);
        }
        self.session
            .as_ref()
            .ok_or_else(|| ModelError::Configuration("session unavailable".to_string()))
    }

    fn open_session(settings: &ClientSettings) -> Result<GeminiSession, ModelError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                std::env::var(&settings.api_key_env)
                    .ok()
                    .filter(|key| !key.trim().is_empty())
            })
            .ok_or_else(|| {
                tracing::error!(env = %settings.api_key_env, "no API key configured");
                ModelError::Configuration(format!(
                    "{} environment variable not set.",
                    settings.api_key_env
                ))
            })?;

        // no overall timeout: a reply may stream for as long as the model writes
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| ModelError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(model = %settings.model, "chat session opened");

        Ok(GeminiSession {
            http,
            api_key,
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.settings.base_url, self.settings.model
        )
    }

    /// Read the whole reply, forwarding each fragment as it arrives.
    async fn read_reply(
        http: reqwest::Client,
        url: String,
        api_key: String,
        request: GenerateContentRequest,
        tx: &FragmentSender,
    ) -> Result<String, ModelError> {
        let response = http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(format!("Request to model failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Transport(format_api_error(status, &body)));
        }

        let mut stream = response.bytes_stream();
        let mut sse = SseBuffer::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ModelError::Transport(format!("Connection lost while streaming: {}", e)))?;
            for payload in sse.push(&chunk) {
                Self::forward_payload(&payload, tx, &mut reply).await?;
            }
        }

        if let Some(payload) = sse.finish() {
            Self::forward_payload(&payload, tx, &mut reply).await?;
        }

        Ok(reply)
    }

    async fn forward_payload(
        payload: &str,
        tx: &FragmentSender,
        reply: &mut String,
    ) -> Result<(), ModelError> {
        let text = parse_payload(payload)?;
        if text.is_empty() {
            return Ok(());
        }

        reply.push_str(&text);
        if !tx.text(text).await {
            return Err(ModelError::Transport("Reply consumer went away".to_string()));
        }
        Ok(())
    }
}

impl ModelClient for GeminiClient {
    fn connect(&mut self) -> Result<(), ModelError> {
        self.session().map(|_| ())
    }

    fn send_turn(&mut self, text: &str) -> FragmentStream {
        let url = self.stream_url();
        let system_instruction = Content::text(None, self.settings.system_instruction.clone());

        let session = match self.session() {
            Ok(session) => session,
            Err(err) => return FragmentStream::failed(err),
        };

        let user_content = Content::text(Some("user"), text);
        let contents = {
            let history = session.history.lock().unwrap_or_else(|e| e.into_inner());
            let mut contents = history.clone();
            contents.push(user_content.clone());
            contents
        };
        let request = GenerateContentRequest {
            contents,
            system_instruction,
        };

        let http = session.http.clone();
        let api_key = session.api_key.clone();
        let history = Arc::clone(&session.history);
        let (tx, stream) = FragmentStream::channel();

        tracing::debug!(%url, turns = request.contents.len(), "sending turn");

        tokio::spawn(async move {
            match Self::read_reply(http, url, api_key, request, &tx).await {
                // only completed exchanges with text become context for later turns;
                // the API rejects empty parts
                Ok(reply) if reply.is_empty() => {
                    tracing::warn!("model returned no text; turn left out of session context");
                }
                Ok(reply) => {
                    let mut history = history.lock().unwrap_or_else(|e| e.into_inner());
                    history.push(user_content);
                    history.push(Content::text(Some("model"), reply));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "model stream failed");
                    tx.fail(err).await;
                }
            }
        });

        stream
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

/// Extract the reply text carried by one streamed response payload
fn parse_payload(payload: &str) -> Result<String, ModelError> {
    let response: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| ModelError::Transport(format!("Malformed response from model: {}", e)))?;

    if let Some(error) = response.error {
        let message = error
            .message
            .unwrap_or_else(|| "Model reported an error".to_string());
        return Err(ModelError::Transport(collapse_whitespace(&message)));
    }

    if response.candidates.is_empty() {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ModelError::Transport(format!(
                "The request was blocked by the model ({})",
                reason
            )));
        }
    }

    Ok(response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(Content::joined_text)
        .unwrap_or_default())
}

fn format_api_error(status: reqwest::StatusCode, body: &str) -> String {
    let summary = serde_json::from_str::<serde_json::Value>(body.trim())
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.pointer("/0/error/message"))
                .and_then(|v| v.as_str())
                .map(collapse_whitespace)
        })
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| collapse_whitespace(trimmed))
        });

    match summary {
        Some(summary) => format!("Model API error ({}): {}", status, summary),
        None => format!("Model API error ({})", status),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
