//! video-topics - 動画の音声からトピック一覧を抽出するシステム
//!
//! このクレートは、動画の音声トラックをダウンロードし、OpenAI Whisper で
//! 文字起こししたうえで、チャットモデルを使って主要なトピックを抽出します。
//!
//! # 主な機能
//!
//! - **区間分割**: 長い音声を一定時間ごとに分割（ストリームコピー、失敗時は再エンコード）
//! - **並列文字起こし**: 区間ごとに並列で文字起こしし、区間順に再結合
//! - **チャンク分割**: 文字起こしを段落単位で文字数上限以内のチャンクに分割
//! - **並列トピック抽出**: チャンクごとに候補を抽出し、重複除去して1回の呼び出しで統合
//! - **後片付け**: 成功・失敗にかかわらず一時ファイルを必ず削除
//!
//! # アーキテクチャ
//!
//! ```text
//! [yt-dlp] → [MediaAsset] → [Segmenter] → [Segment ×N]
//!                                              ↓
//!                                   [WorkerPool → Whisper]
//!                                              ↓
//!                                        [Transcript]
//!                                              ↓
//!                                   [chunker] → [TextChunk ×M]
//!                                              ↓
//!                                   [WorkerPool → Chat API]
//!                                              ↓
//!                                 [重複除去 → 統合呼び出し]
//!                                              ↓
//!                                         [TopicSet]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use video_topics::config::Config;
//! use video_topics::pipeline::Pipeline;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_or_default("config.toml")?;
//! let api_key = config.openai.resolve_api_key()?;
//! let pipeline = Pipeline::from_config(&config, api_key)?;
//! let topics = pipeline.process("https://www.youtube.com/watch?v=...", 7).await?;
//! println!("{:?}", topics.topics);
//! # Ok(())
//! # }
//! ```

pub mod chat_api;
pub mod chunker;
pub mod config;
pub mod error;
pub mod media_source;
pub mod pipeline;
pub mod retry;
pub mod segmenter;
pub mod summarize_backend;
pub mod topics;
pub mod transcribe_backend;
pub mod transcription;
pub mod types;
pub mod whisper_api;
pub mod worker_pool;
pub mod workspace;
