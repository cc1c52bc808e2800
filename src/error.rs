use serde::Serialize;
use std::fmt;

/// パイプラインの処理段階
///
/// `Failed` はどの段階からも遷移しうる終端状態。
/// `Cleaning` は成功・失敗にかかわらず必ず最後に実行される。
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Downloading,
    Segmenting,
    Transcribing,
    Chunking,
    ExtractingTopics,
    Cleaning,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Downloading => "downloading",
            Stage::Segmenting => "segmenting",
            Stage::Transcribing => "transcribing",
            Stage::Chunking => "chunking",
            Stage::ExtractingTopics => "extracting_topics",
            Stage::Cleaning => "cleaning",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// リクエスト単位の終端エラー
///
/// 呼び出し側には固定のカテゴリと人間向けのメッセージのみを返す。
/// 部分的な文字起こしやトピックは含めない。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("error downloading the video audio: {message}")]
    DownloadFailed { message: String },

    #[error("error splitting the audio: {message}")]
    SegmentationFailed { message: String },

    #[error("error transcribing segment {segment_index}: {message}")]
    TranscriptionFailed {
        segment_index: usize,
        message: String,
    },

    #[error("error processing the topics: {message}")]
    TopicExtractionFailed { message: String },
}

impl PipelineError {
    /// 安定したカテゴリ名（JSON出力用）
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest { .. } => "invalid_request",
            PipelineError::DownloadFailed { .. } => "download_failed",
            PipelineError::SegmentationFailed { .. } => "segmentation_failed",
            PipelineError::TranscriptionFailed { .. } => "transcription_failed",
            PipelineError::TopicExtractionFailed { .. } => "topic_extraction_failed",
        }
    }

    /// エラーが発生した段階
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InvalidRequest { .. } => Stage::Idle,
            PipelineError::DownloadFailed { .. } => Stage::Downloading,
            PipelineError::SegmentationFailed { .. } => Stage::Segmenting,
            PipelineError::TranscriptionFailed { .. } => Stage::Transcribing,
            PipelineError::TopicExtractionFailed { .. } => Stage::ExtractingTopics,
        }
    }

    /// anyhow のエラーチェーンを1行のメッセージに整形
    pub(crate) fn describe(err: &anyhow::Error) -> String {
        format!("{:#}", err)
    }
}
