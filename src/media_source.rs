use crate::config::MediaConfig;
use crate::types::{MediaAsset, Segment};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// 取得結果
///
/// ソースが区間長を考慮した取得に対応している場合は、
/// ダウンロードと分割を1ステップで済ませて `Segments` を返す。
#[derive(Clone, Debug)]
pub enum Retrieved {
    Asset(MediaAsset),
    Segments(Vec<Segment>),
}

/// 音声の取得元
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// `reference` の音声を `dir` 配下に保存する
    ///
    /// `dir` は作業ディレクトリで、保存したファイルはパイプライン側で削除される。
    async fn fetch(&self, reference: &str, dir: &Path) -> Result<Retrieved>;
}

/// yt-dlp による音声ダウンロード
pub struct YtDlpSource {
    program: String,
    audio_format: String,
}

impl YtDlpSource {
    const STEM: &'static str = "audio";

    pub fn new(config: &MediaConfig) -> Self {
        Self {
            program: config.downloader.clone(),
            audio_format: config.audio_format.clone(),
        }
    }

    fn args(&self, reference: &str, dir: &Path) -> Vec<String> {
        let template = dir.join(format!("{}.%(ext)s", Self::STEM));
        vec![
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            self.audio_format.clone(),
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            reference.to_string(),
        ]
    }
}

/// ダウンロードされたファイルを探す
///
/// 変換後の拡張子を優先し、見つからなければ同じ語幹の別ファイルを返す。
async fn find_downloaded(dir: &Path, stem: &str, format: &str) -> Result<PathBuf> {
    let expected = dir.join(format!("{}.{}", stem, format));
    if tokio::fs::try_exists(&expected).await.unwrap_or(false) {
        return Ok(expected);
    }

    let prefix = format!("{}.", stem);
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("ディレクトリの読み込みに失敗: {:?}", dir))?;
    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("ダウンロードした音声ファイルが見つかりません: {:?}", dir))
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn fetch(&self, reference: &str, dir: &Path) -> Result<Retrieved> {
        log::info!("音声をダウンロード中: {}", reference);

        let output = Command::new(&self.program)
            .args(self.args(reference, dir))
            .output()
            .await
            .with_context(|| format!("{} の起動に失敗", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} が失敗しました ({}): {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        let path = find_downloaded(dir, Self::STEM, &self.audio_format).await?;
        log::info!("音声をダウンロードしました: {:?}", path);
        Ok(Retrieved::Asset(MediaAsset::from_path(path)))
    }
}
