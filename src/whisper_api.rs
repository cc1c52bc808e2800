use crate::config::OpenAiConfig;
use crate::transcribe_backend::{AudioClip, Transcriber};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

/// OpenAI Whisper API レスポンス
#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

/// OpenAI Whisper API バックエンド
///
/// APIキーは構築時に明示的に渡す（グローバル状態は持たない）。
pub struct WhisperTranscriber {
    api_key: String,
    endpoint: String,
    model: String,
    language: Option<String>,
    client: reqwest::Client,
}

impl WhisperTranscriber {
    pub fn new(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Whisper API HTTPクライアント作成失敗")?;

        Ok(Self {
            api_key,
            endpoint: format!(
                "{}/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.whisper_model.clone(),
            language: config.language.clone(),
            client,
        })
    }
}

/// 拡張子からMIMEタイプを推定
fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        let size = clip.bytes.len();
        let part = multipart::Part::bytes(clip.bytes)
            .file_name(clip.file_name.clone())
            .mime_str(mime_for(&clip.file_name))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }

        log::debug!("Whisper API: {} ({} バイト) を送信", clip.file_name, size);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Whisper API リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Whisper API エラー: {} - {}", status, error_text);
        }

        let whisper_response: WhisperResponse = response
            .json::<WhisperResponse>()
            .await
            .context("Whisper API レスポンスパース失敗")?;

        Ok(whisper_response.text)
    }
}
