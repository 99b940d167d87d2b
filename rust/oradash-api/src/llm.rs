//! OpenAI-compatible client for SQL analysis.
//!
//! Non-streaming `/v1/chat/completions` calls only. Works with OpenAI and any
//! compatible gateway.

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = "You are an Oracle performance tuning expert. \
Review the SQL statement and execution plan you are given. Point out the most \
expensive operations, likely causes such as missing indexes, stale statistics \
or poor join order, and give concrete, prioritized recommendations. Be concise.";

/// Result of one analysis call.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub analysis: String,
    pub model: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Chat completion client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { config, client })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Ask for a tuning analysis of `sql_text` and, when known, its plan.
    pub async fn analyze_sql(&self, sql_text: &str, plan: Option<&str>) -> anyhow::Result<Analysis> {
        let mut user = format!("SQL statement:\n```sql\n{sql_text}\n```\n");
        if let Some(plan) = plan.filter(|p| !p.is_empty()) {
            user.push_str(&format!("\nExecution plan:\n```\n{plan}\n```\n"));
        }

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user },
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": false,
        });

        let mut request = self.client.post(self.api_url()).json(&body);
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.context("LLM request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error ({status}): {text}");
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .context("Failed to parse LLM response")?;
        let analysis = completion
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .context("LLM response contained no content")?;

        Ok(Analysis {
            analysis,
            model: completion.model.unwrap_or_else(|| self.config.model.clone()),
            prompt_tokens: completion.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: completion.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}
