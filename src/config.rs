use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// パイプライン設定
///
/// 分割・並列度・トピック数に関する設定。
///
/// # デフォルト値
///
/// - `segment_duration_secs`: 480 秒 (8分)
/// - `max_chunk_chars`: 12000 文字
/// - `transcribe_workers`: 3
/// - `topic_workers`: 2
/// - `default_topic_count`: 7
/// - `work_dir`: "" (システムの一時ディレクトリ)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u64,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_transcribe_workers")]
    pub transcribe_workers: usize,
    #[serde(default = "default_topic_workers")]
    pub topic_workers: usize,
    #[serde(default = "default_topic_count")]
    pub default_topic_count: usize,
    #[serde(default)]
    pub work_dir: String,
}

/// リトライ設定
///
/// リモート呼び出し1回あたりの最大試行回数。
/// デフォルトは 1 (リトライなし、即時失敗)。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// OpenAI API 設定
///
/// Whisper (文字起こし) と Chat Completions (トピック抽出) の両方で共有する。
/// `api_key` が空の場合は環境変数 `OPENAI_API_KEY` を使用する。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Whisper モデル名（通常 "whisper-1"）
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 言語コード（"pt", "en" など）。省略時は自動判定
    pub language: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// プロンプト設定
///
/// `instruction` の `{count}` はトピック数に置換される。
/// プロバイダを差し替える場合もこの文面は互換性の一部として扱う。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_instruction")]
    pub instruction: String,
}

/// 外部ツール設定
///
/// # デフォルト値
///
/// - `downloader`: "yt-dlp"
/// - `ffmpeg`: "ffmpeg"
/// - `ffprobe`: "ffprobe"
/// - `audio_format`: "mp3"
/// - `fallback_sample_rate`: 16000 Hz (再エンコード時、Whisper向け)
/// - `fallback_bitrate`: "64k"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    #[serde(default = "default_downloader")]
    pub downloader: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_fallback_sample_rate")]
    pub fallback_sample_rate: u32,
    #[serde(default = "default_fallback_bitrate")]
    pub fallback_bitrate: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_segment_duration_secs() -> u64 {
    480 // Whisper API のファイルサイズ上限 (25MB) に余裕を持たせる
}

fn default_max_chunk_chars() -> usize {
    12000
}

fn default_transcribe_workers() -> usize {
    3
}

fn default_topic_workers() -> usize {
    2
}

fn default_topic_count() -> usize {
    7
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_system_prompt() -> String {
    "Você é um assistente especializado em resumir conteúdos educativos.".to_string()
}

fn default_instruction() -> String {
    "Extraia os {count} principais tópicos abordados na seguinte transcrição e retorne uma lista clara e concisa:"
        .to_string()
}

fn default_downloader() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_fallback_sample_rate() -> u32 {
    16000
}

fn default_fallback_bitrate() -> String {
    "64k".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: default_segment_duration_secs(),
            max_chunk_chars: default_max_chunk_chars(),
            transcribe_workers: default_transcribe_workers(),
            topic_workers: default_topic_workers(),
            default_topic_count: default_topic_count(),
            work_dir: String::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            whisper_model: default_whisper_model(),
            chat_model: default_chat_model(),
            temperature: default_temperature(),
            language: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            instruction: default_instruction(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            downloader: default_downloader(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            audio_format: default_audio_format(),
            fallback_sample_rate: default_fallback_sample_rate(),
            fallback_bitrate: default_fallback_bitrate(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl OpenAiConfig {
    /// APIキーを解決
    ///
    /// 設定ファイルの値を優先し、空なら環境変数 `OPENAI_API_KEY` を参照する。
    pub fn resolve_api_key(&self) -> Result<String> {
        if !self.api_key.trim().is_empty() {
            return Ok(self.api_key.trim().to_string());
        }
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OpenAI APIキーが設定されていません (openai.api_key または OPENAI_API_KEY)"))
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use video_topics::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}
