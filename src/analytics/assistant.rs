//! `AnswerService` backed by an OpenAI-compatible chat completions endpoint

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::analytics::answer::AnswerService;
use crate::config::AssistantConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpAssistant {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpAssistant {
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("beacon-assistant/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client for the assistant")?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.api_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

/// Accepts either the API base or the full completions URL
fn chat_endpoint(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn system_message(context: &Value) -> String {
    let data = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    format!(
        "You are an analytics assistant. Analyze website analytics data and answer user questions with clear, actionable insights.\n\n\
         Data available:\n{data}\n\n\
         Provide concise, data-driven answers. Include specific numbers and trends."
    )
}

#[async_trait]
impl AnswerService for HttpAssistant {
    async fn answer(&self, question: &str, context: &Value) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_message(context) },
                { "role": "user", "content": question },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let completion: ChatCompletion = request
            .send()
            .await
            .context("failed to reach the assistant")?
            .error_for_status()
            .context("assistant returned an error status")?
            .json()
            .await
            .context("failed to parse assistant response")?;

        let answer = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("assistant response contained no answer"))?;

        debug!(model = %self.model, "Assistant answered");
        Ok(answer)
    }
}
