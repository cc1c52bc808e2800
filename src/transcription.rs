use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::transcribe_backend::{AudioClip, Transcriber};
use crate::types::{Segment, Transcript};
use crate::worker_pool::WorkerPool;
use anyhow::{Context, Result};
use std::sync::Arc;

/// 区間ごとの文字起こし（ファンアウト/ファンイン）
///
/// 区間が1つなら直接1回だけ呼び出す。複数ならワーカープールで並列に
/// 処理し、結果を区間インデックスの位置に書き込んでから連結する。
/// どれか1区間でも失敗したら全体が失敗する（部分的な文字起こしは返さない）。
/// 失敗が出た時点でまだ始まっていない区間は送信しない。
pub struct SegmentTranscriber {
    transcriber: Arc<dyn Transcriber>,
    pool: WorkerPool,
    retry: RetryPolicy,
}

/// 区間ファイルを読み込み、文字起こしする
async fn transcribe_segment(
    transcriber: &dyn Transcriber,
    retry: RetryPolicy,
    segment: &Segment,
) -> Result<String> {
    let bytes = tokio::fs::read(&segment.path)
        .await
        .with_context(|| format!("区間ファイルの読み込みに失敗: {:?}", segment.path))?;
    let clip = AudioClip {
        file_name: segment.file_name(),
        bytes,
    };

    let label = format!("区間 {}", segment.index);
    let text = retry
        .run(&label, || transcriber.transcribe(clip.clone()))
        .await?;
    log::debug!("区間 {}: {} 文字", segment.index, text.chars().count());
    Ok(text.trim().to_string())
}

impl SegmentTranscriber {
    pub fn new(transcriber: Arc<dyn Transcriber>, workers: usize, retry: RetryPolicy) -> Self {
        Self {
            transcriber,
            pool: WorkerPool::new("文字起こし", workers),
            retry,
        }
    }

    pub async fn transcribe(&self, mut segments: Vec<Segment>) -> Result<Transcript, PipelineError> {
        segments.sort_by_key(|s| s.index);
        if let Some((position, segment)) = segments
            .iter()
            .enumerate()
            .find(|(position, segment)| segment.index != *position)
        {
            return Err(PipelineError::TranscriptionFailed {
                segment_index: position,
                message: format!("区間インデックスが連続していません: {}", segment.index),
            });
        }

        match segments.len() {
            0 => Err(PipelineError::TranscriptionFailed {
                segment_index: 0,
                message: "文字起こしする区間がありません".to_string(),
            }),
            1 => {
                log::info!("区間1つのため直接文字起こしします");
                let text = transcribe_segment(self.transcriber.as_ref(), self.retry, &segments[0])
                    .await
                    .map_err(|e| PipelineError::TranscriptionFailed {
                        segment_index: 0,
                        message: PipelineError::describe(&e),
                    })?;
                Ok(Transcript::new(vec![text]))
            }
            _ => self.transcribe_parallel(segments).await,
        }
    }

    async fn transcribe_parallel(&self, segments: Vec<Segment>) -> Result<Transcript, PipelineError> {
        let total = segments.len();
        log::info!(
            "{} 区間を最大 {} 並列で文字起こしします",
            total,
            self.pool.size()
        );

        let transcriber = Arc::clone(&self.transcriber);
        let retry = self.retry;
        let results = self
            .pool
            .run_until(
                segments,
                move |_, segment: Segment| {
                    let transcriber = Arc::clone(&transcriber);
                    async move { transcribe_segment(transcriber.as_ref(), retry, &segment).await }
                },
                |result: &Result<String>| result.is_err(),
            )
            .await;

        // 完了順に届く結果をインデックスの位置へ書き込む（追記はしない）
        // 打ち切られた区間は空きのまま残るが、その場合は必ず失敗がある
        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut failure: Option<(usize, String)> = None;
        for (index, result) in results {
            match result {
                Ok(text) => slots[index] = Some(text),
                Err(e) => {
                    log::error!("区間 {} の文字起こしに失敗: {:#}", index, e);
                    if failure.as_ref().map_or(true, |(first, _)| index < *first) {
                        failure = Some((index, PipelineError::describe(&e)));
                    }
                }
            }
        }

        if let Some((segment_index, message)) = failure {
            return Err(PipelineError::TranscriptionFailed {
                segment_index,
                message,
            });
        }

        let fragments = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| PipelineError::TranscriptionFailed {
                    segment_index: index,
                    message: "結果が返されませんでした".to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("{} 区間の文字起こしが完了しました", total);
        Ok(Transcript::new(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// ファイル内容をそのまま返す文字起こし器
    ///
    /// `delays_ms[i]` だけ待ってから応答するので、完了順を操作できる。
    struct EchoTranscriber {
        delays_ms: Vec<u64>,
        fail: HashSet<usize>,
        calls: AtomicUsize,
    }

    impl EchoTranscriber {
        fn new(delays_ms: Vec<u64>) -> Self {
            Self {
                delays_ms,
                fail: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transcriber for EchoTranscriber {
        async fn transcribe(&self, clip: AudioClip) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index: usize = clip.file_name[8..11].parse()?;
            let delay = self.delays_ms.get(index).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail.contains(&index) {
                anyhow::bail!("upstream error for {}", clip.file_name);
            }
            Ok(format!(" {} ", String::from_utf8(clip.bytes)?))
        }
    }

    fn write_segments(dir: &Path, count: usize) -> Vec<Segment> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("segment_{:03}.mp3", i));
                std::fs::write(&path, format!("fragment {}", i)).unwrap();
                Segment::new(i, path)
            })
            .collect()
    }

    fn expected_text(count: usize) -> String {
        (0..count)
            .map(|i| format!("fragment {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_order_is_independent_of_completion_order() {
        let dir = TempDir::new().unwrap();
        let segments = write_segments(dir.path(), 5);

        let delay_orders: [[u64; 5]; 4] = [
            [0, 0, 0, 0, 0],
            [40, 30, 20, 10, 0],
            [0, 40, 10, 30, 20],
            [25, 0, 35, 5, 15],
        ];

        for delays in delay_orders {
            for workers in [1, 2, 3, 5] {
                let transcriber = Arc::new(EchoTranscriber::new(delays.to_vec()));
                let stage = SegmentTranscriber::new(transcriber.clone(), workers, RetryPolicy::fail_fast());

                // 入力順を逆にしても結果は区間順
                let mut shuffled = segments.clone();
                shuffled.reverse();

                let transcript = stage.transcribe(shuffled).await.unwrap();
                assert_eq!(transcript.text(), expected_text(5), "delays {:?}, workers {}", delays, workers);
                assert_eq!(transcriber.calls.load(Ordering::SeqCst), 5);
            }
        }
    }

    #[tokio::test]
    async fn test_single_segment_calls_once() {
        let dir = TempDir::new().unwrap();
        let segments = write_segments(dir.path(), 1);
        let transcriber = Arc::new(EchoTranscriber::new(vec![0]));
        let stage = SegmentTranscriber::new(transcriber.clone(), 3, RetryPolicy::fail_fast());

        let transcript = stage.transcribe(segments).await.unwrap();
        assert_eq!(transcript.text(), "fragment 0");
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reports_segment_index() {
        let dir = TempDir::new().unwrap();
        let segments = write_segments(dir.path(), 4);
        let mut transcriber = EchoTranscriber::new(vec![0, 0, 0, 0]);
        transcriber.fail.insert(2);
        let stage = SegmentTranscriber::new(Arc::new(transcriber), 3, RetryPolicy::fail_fast());

        match stage.transcribe(segments).await {
            Err(PipelineError::TranscriptionFailed { segment_index, message }) => {
                assert_eq!(segment_index, 2);
                assert!(message.contains("upstream error"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_stops_sending_remaining_segments() {
        let dir = TempDir::new().unwrap();
        let segments = write_segments(dir.path(), 6);
        let mut transcriber = EchoTranscriber::new(vec![]);
        transcriber.fail.insert(0);
        let transcriber = Arc::new(transcriber);
        let stage = SegmentTranscriber::new(transcriber.clone(), 1, RetryPolicy::fail_fast());

        let err = stage.transcribe(segments).await.unwrap_err();
        assert!(matches!(err, PipelineError::TranscriptionFailed { segment_index: 0, .. }));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let segments = write_segments(dir.path(), 3);
        std::fs::remove_file(&segments[1].path).unwrap();

        let stage = SegmentTranscriber::new(
            Arc::new(EchoTranscriber::new(vec![])),
            2,
            RetryPolicy::fail_fast(),
        );
        let err = stage.transcribe(segments).await.unwrap_err();
        assert!(matches!(err, PipelineError::TranscriptionFailed { segment_index: 1, .. }));
    }

    #[tokio::test]
    async fn test_gap_in_indices_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut segments = write_segments(dir.path(), 3);
        segments[2].index = 5;

        let stage = SegmentTranscriber::new(
            Arc::new(EchoTranscriber::new(vec![])),
            2,
            RetryPolicy::fail_fast(),
        );
        assert!(stage.transcribe(segments).await.is_err());
    }
}
