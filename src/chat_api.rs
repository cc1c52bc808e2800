use crate::config::{OpenAiConfig, PromptConfig};
use crate::summarize_backend::Summarizer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Chat Completions API レスポンス（必要な部分のみ）
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI Chat Completions API バックエンド
pub struct ChatSummarizer {
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    client: reqwest::Client,
}

impl ChatSummarizer {
    pub fn new(config: &OpenAiConfig, prompt: &PromptConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Chat API HTTPクライアント作成失敗")?;

        Ok(Self {
            api_key,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            system_prompt: prompt.system.clone(),
            client,
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        }
    }
}

/// 最初の選択肢の本文を取り出す
fn first_content(response: ChatResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        anyhow::bail!("Chat API の応答が空です");
    }
    Ok(content)
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, prompt: &str, target_count: usize) -> Result<String> {
        log::debug!(
            "Chat API: {} 文字のプロンプトを送信 (トピック数 {})",
            prompt.chars().count(),
            target_count
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .context("Chat API リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat API エラー: {} - {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json::<ChatResponse>()
            .await
            .context("Chat API レスポンスパース失敗")?;

        first_content(chat_response)
    }
}
