use crate::chat_api::ChatSummarizer;
use crate::chunker;
use crate::config::Config;
use crate::error::{PipelineError, Stage};
use crate::media_source::{MediaSource, Retrieved, YtDlpSource};
use crate::retry::RetryPolicy;
use crate::segmenter::{FfmpegSegmenter, Segmenter};
use crate::summarize_backend::Summarizer;
use crate::topics::{PromptTemplate, TopicExtractor};
use crate::transcribe_backend::Transcriber;
use crate::transcription::SegmentTranscriber;
use crate::types::{Segment, TopicSet};
use crate::whisper_api::WhisperTranscriber;
use crate::workspace::Workspace;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// パイプラインの調整パラメータ
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub segment_duration: Duration,
    pub max_chunk_chars: usize,
    pub transcribe_workers: usize,
    pub topic_workers: usize,
    pub work_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            segment_duration: Duration::from_secs(config.pipeline.segment_duration_secs),
            max_chunk_chars: config.pipeline.max_chunk_chars,
            transcribe_workers: config.pipeline.transcribe_workers,
            topic_workers: config.pipeline.topic_workers,
            work_dir: PathBuf::from(&config.pipeline.work_dir),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 処理段階の遷移を記録する
struct StageTracker {
    current: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: Stage::Idle,
        }
    }

    fn enter(&mut self, next: Stage) {
        log::info!("段階: {} → {}", self.current, next);
        self.current = next;
    }
}

/// 動画の音声からトピック一覧を作るパイプライン
///
/// ```text
/// [MediaSource] → [Segmenter] → [SegmentTranscriber (×N)] → [chunker] → [TopicExtractor (×M)]
///       │              │                                                        │
///       └──────────────┴──── Workspace（終了時に必ず削除）                     ↓
///                                                                          [TopicSet]
/// ```
///
/// どの段階で失敗しても残りの段階は実行せず、作業ディレクトリを
/// 削除してからエラーを返す。
pub struct Pipeline {
    settings: PipelineSettings,
    source: Arc<dyn MediaSource>,
    segmenter: Arc<dyn Segmenter>,
    transcription: SegmentTranscriber,
    topics: TopicExtractor,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Arc<dyn MediaSource>,
        segmenter: Arc<dyn Segmenter>,
        transcriber: Arc<dyn Transcriber>,
        summarizer: Arc<dyn Summarizer>,
        template: PromptTemplate,
    ) -> Self {
        let transcription =
            SegmentTranscriber::new(transcriber, settings.transcribe_workers, settings.retry);
        let topics = TopicExtractor::new(summarizer, template, settings.topic_workers, settings.retry);

        Self {
            settings,
            source,
            segmenter,
            transcription,
            topics,
        }
    }

    /// 設定から yt-dlp / ffmpeg / OpenAI を使うパイプラインを構築
    pub fn from_config(config: &Config, api_key: String) -> Result<Self> {
        let transcriber = WhisperTranscriber::new(&config.openai, api_key.clone())?;
        let summarizer = ChatSummarizer::new(&config.openai, &config.prompt, api_key)?;

        Ok(Self::new(
            PipelineSettings::from_config(config),
            Arc::new(YtDlpSource::new(&config.media)),
            Arc::new(FfmpegSegmenter::new(&config.media)),
            Arc::new(transcriber),
            Arc::new(summarizer),
            PromptTemplate::from_config(&config.prompt),
        ))
    }

    /// 動画 `reference` から `target_count` 個程度のトピックを抽出
    pub async fn process(&self, reference: &str, target_count: usize) -> Result<TopicSet, PipelineError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PipelineError::InvalidRequest {
                message: "video URL not provided".to_string(),
            });
        }
        if target_count == 0 {
            return Err(PipelineError::InvalidRequest {
                message: "topic count must be at least 1".to_string(),
            });
        }

        let mut tracker = StageTracker::new();
        let mut workspace = Workspace::create(&self.settings.work_dir)
            .await
            .map_err(|e| PipelineError::DownloadFailed {
                message: PipelineError::describe(&e),
            })?;

        let result = self
            .run_stages(reference, target_count, &workspace, &mut tracker)
            .await;

        tracker.enter(Stage::Cleaning);
        if let Err(e) = workspace.cleanup().await {
            log::error!("作業ディレクトリの削除に失敗: {:#}", e);
        }

        match &result {
            Ok(topics) => {
                tracker.enter(Stage::Done);
                log::info!("トピック {} 件を抽出しました", topics.len());
            }
            Err(e) => {
                tracker.enter(Stage::Failed);
                log::error!("段階 {} で失敗しました: {}", e.stage(), e);
            }
        }

        result
    }

    async fn run_stages(
        &self,
        reference: &str,
        target_count: usize,
        workspace: &Workspace,
        tracker: &mut StageTracker,
    ) -> Result<TopicSet, PipelineError> {
        tracker.enter(Stage::Downloading);
        let retrieved = self
            .source
            .fetch(reference, workspace.path())
            .await
            .map_err(|e| PipelineError::DownloadFailed {
                message: PipelineError::describe(&e),
            })?;

        let segments = match retrieved {
            Retrieved::Segments(segments) => {
                log::info!("取得時に {} 区間に分割済み", segments.len());
                segments
            }
            Retrieved::Asset(asset) => {
                tracker.enter(Stage::Segmenting);
                self.segmenter
                    .segment(&asset, self.settings.segment_duration, workspace.path())
                    .await
                    .map_err(|e| PipelineError::SegmentationFailed {
                        message: PipelineError::describe(&e),
                    })?
            }
        };
        ensure_segments(&segments)?;

        tracker.enter(Stage::Transcribing);
        let transcript = self.transcription.transcribe(segments).await?;
        if transcript.is_blank() {
            return Err(PipelineError::TranscriptionFailed {
                segment_index: 0,
                message: "文字起こし結果が空です".to_string(),
            });
        }

        tracker.enter(Stage::Chunking);
        let text = transcript.text();
        let chunks = chunker::chunk(&text, self.settings.max_chunk_chars);
        if chunks.len() == 1 {
            log::info!(
                "文字起こし {} 文字: 1回の要約で処理します",
                text.chars().count()
            );
        } else {
            log::info!(
                "文字起こし {} 文字を {} チャンクに分割しました",
                text.chars().count(),
                chunks.len()
            );
        }

        tracker.enter(Stage::ExtractingTopics);
        self.topics.extract(chunks, target_count).await
    }
}

fn ensure_segments(segments: &[Segment]) -> Result<(), PipelineError> {
    if segments.is_empty() {
        return Err(PipelineError::SegmentationFailed {
            message: "区間が1つも生成されませんでした".to_string(),
        });
    }
    Ok(())
}

/// リクエストのトピック数を解釈
///
/// 未指定・解釈できない値・0 の場合は `default` を使う。
///
/// # Examples
///
/// ```
/// # use video_topics::pipeline::parse_topic_count;
/// assert_eq!(parse_topic_count(Some(" 5 "), 7), 5);
/// assert_eq!(parse_topic_count(Some("cinco"), 7), 7);
/// assert_eq!(parse_topic_count(None, 7), 7);
/// ```
pub fn parse_topic_count(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe_backend::AudioClip;
    use crate::types::MediaAsset;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 作業ディレクトリに偽の音声ファイルを書く
    struct FakeSource {
        fail: bool,
        presegmented: usize,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                fail: false,
                presegmented: 0,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn fetch(&self, _reference: &str, dir: &Path) -> Result<Retrieved> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("video unavailable");
            }
            if self.presegmented > 0 {
                return Ok(Retrieved::Segments(write_segment_files(dir, self.presegmented)));
            }
            let path = dir.join("audio.mp3");
            fs::write(&path, "whole audio")?;
            Ok(Retrieved::Asset(MediaAsset::from_path(path)))
        }
    }

    /// 音声長から区間数を決めて偽の区間ファイルを書く
    struct FakeSegmenter {
        duration_secs: u64,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeSegmenter {
        fn new(duration_secs: u64) -> Self {
            Self {
                duration_secs,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Segmenter for FakeSegmenter {
        async fn segment(
            &self,
            asset: &MediaAsset,
            target: Duration,
            out_dir: &Path,
        ) -> Result<Vec<Segment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                // 失敗前に途中のファイルが残っていても削除されること
                fs::create_dir_all(out_dir.join("segments"))?;
                fs::write(out_dir.join("segments").join("segment_000.mp3"), "partial")?;
                anyhow::bail!("Invalid data found when processing input");
            }
            let count = self.duration_secs.div_ceil(target.as_secs()) as usize;
            if count <= 1 {
                return Ok(vec![Segment::new(0, &asset.path)]);
            }
            let dir = out_dir.join("segments");
            fs::create_dir_all(&dir)?;
            Ok(write_segment_files(&dir, count))
        }
    }

    fn write_segment_files(dir: &Path, count: usize) -> Vec<Segment> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("segment_{:03}.mp3", i));
                fs::write(&path, format!("segment {}", i)).unwrap();
                Segment::new(i, path)
            })
            .collect()
    }

    /// ファイル内容を `paragraph_chars` 文字の段落に引き伸ばして返す
    struct FakeTranscriber {
        fail_on: Option<String>,
        paragraph_chars: usize,
        paragraphs: usize,
        calls: AtomicUsize,
    }

    impl FakeTranscriber {
        fn new() -> Self {
            Self {
                fail_on: None,
                paragraph_chars: 20,
                paragraphs: 1,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, clip: AudioClip) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(clip.file_name.as_str()) {
                anyhow::bail!("503 Service Unavailable");
            }
            let content = String::from_utf8(clip.bytes)?;
            let paragraph: String = content.chars().cycle().take(self.paragraph_chars).collect();
            Ok(vec![paragraph; self.paragraphs].join("\n"))
        }
    }

    struct FakeSummarizer {
        prompts: Mutex<Vec<String>>,
    }

    impl FakeSummarizer {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, prompt: &str, target_count: usize) -> Result<String> {
            let call = {
                let mut prompts = self.prompts.lock().unwrap();
                prompts.push(prompt.to_string());
                prompts.len()
            };
            Ok((1..=target_count)
                .map(|i| format!("{}. Topic {}-{}", i, call, i))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    struct Harness {
        root: TempDir,
        source: Arc<FakeSource>,
        segmenter: Arc<FakeSegmenter>,
        transcriber: Arc<FakeTranscriber>,
        summarizer: Arc<FakeSummarizer>,
        pipeline: Pipeline,
    }

    fn harness(source: FakeSource, segmenter: FakeSegmenter, transcriber: FakeTranscriber) -> Harness {
        let root = TempDir::new().unwrap();
        let settings = PipelineSettings {
            work_dir: root.path().to_path_buf(),
            ..PipelineSettings::default()
        };
        let source = Arc::new(source);
        let segmenter = Arc::new(segmenter);
        let transcriber = Arc::new(transcriber);
        let summarizer = Arc::new(FakeSummarizer::new());

        let pipeline = Pipeline::new(
            settings,
            source.clone(),
            segmenter.clone(),
            transcriber.clone(),
            summarizer.clone(),
            PromptTemplate::default(),
        );

        Harness {
            root,
            source,
            segmenter,
            transcriber,
            summarizer,
            pipeline,
        }
    }

    fn leftover_files(root: &Path) -> usize {
        fs::read_dir(root).unwrap().count()
    }

    #[tokio::test]
    async fn test_short_asset_single_segment_single_call() {
        // 3分の音声、区間長480秒 → 区間1つ、文字起こし1回
        let h = harness(FakeSource::new(), FakeSegmenter::new(180), FakeTranscriber::new());

        let topics = h.pipeline.process("https://youtu.be/abc", 7).await.unwrap();

        assert_eq!(topics.len(), 7);
        assert_eq!(h.segmenter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.summarizer.calls(), 1);
        assert_eq!(leftover_files(h.root.path()), 0);
    }

    #[tokio::test]
    async fn test_long_transcript_takes_chunked_path() {
        let mut transcriber = FakeTranscriber::new();
        transcriber.paragraph_chars = 500;
        transcriber.paragraphs = 20;
        // 30分 → 4区間 × 約10000文字
        let h = harness(FakeSource::new(), FakeSegmenter::new(1800), transcriber);

        let topics = h.pipeline.process("https://youtu.be/abc", 5).await.unwrap();

        assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 4);
        let chunk_calls = h.summarizer.calls() - 1;
        assert!(chunk_calls >= 3, "chunk calls = {}", chunk_calls);
        assert_eq!(topics.len(), 5);
        assert_eq!(leftover_files(h.root.path()), 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_cleans_up() {
        let mut transcriber = FakeTranscriber::new();
        transcriber.fail_on = Some("segment_002.mp3".to_string());
        let h = harness(FakeSource::new(), FakeSegmenter::new(2000), transcriber);

        let err = h.pipeline.process("https://youtu.be/abc", 7).await.unwrap_err();

        assert!(matches!(err, PipelineError::TranscriptionFailed { segment_index: 2, .. }));
        assert_eq!(h.summarizer.calls(), 0);
        assert_eq!(leftover_files(h.root.path()), 0);
    }

    #[tokio::test]
    async fn test_download_failure() {
        let mut source = FakeSource::new();
        source.fail = true;
        let h = harness(source, FakeSegmenter::new(180), FakeTranscriber::new());

        let err = h.pipeline.process("https://youtu.be/abc", 7).await.unwrap_err();

        assert_eq!(err.category(), "download_failed");
        assert_eq!(h.segmenter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(leftover_files(h.root.path()), 0);
    }

    #[tokio::test]
    async fn test_segmentation_failure_cleans_up() {
        let mut segmenter = FakeSegmenter::new(2000);
        segmenter.fail = true;
        let h = harness(FakeSource::new(), segmenter, FakeTranscriber::new());

        let err = h.pipeline.process("https://youtu.be/abc", 7).await.unwrap_err();

        assert_eq!(err.stage(), Stage::Segmenting);
        assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 0);
        assert_eq!(leftover_files(h.root.path()), 0);
    }

    #[tokio::test]
    async fn test_presegmented_source_skips_segmenter() {
        let mut source = FakeSource::new();
        source.presegmented = 3;
        let h = harness(source, FakeSegmenter::new(180), FakeTranscriber::new());

        h.pipeline.process("https://youtu.be/abc", 3).await.unwrap();

        assert_eq!(h.segmenter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 3);
        assert_eq!(leftover_files(h.root.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_reference_is_rejected() {
        let h = harness(FakeSource::new(), FakeSegmenter::new(180), FakeTranscriber::new());

        let err = h.pipeline.process("   ", 7).await.unwrap_err();

        assert_eq!(err.category(), "invalid_request");
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_topic_count() {
        assert_eq!(parse_topic_count(Some("3"), 7), 3);
        assert_eq!(parse_topic_count(Some("0"), 7), 7);
        assert_eq!(parse_topic_count(Some("-2"), 7), 7);
        assert_eq!(parse_topic_count(Some(""), 7), 7);
    }
}
