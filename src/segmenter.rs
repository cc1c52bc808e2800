use crate::config::MediaConfig;
use crate::types::{MediaAsset, Segment};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// 区間ファイル名の接頭辞（`segment_000.mp3`, `segment_001.mp3`, ...）
const SEGMENT_PREFIX: &str = "segment_";

/// 音声を時間で区切る
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// `asset` を `target` ごとの区間に分割し、インデックス順に返す
    ///
    /// 区間ファイルは `out_dir` 配下に作成する。
    /// 1区間に収まる場合は元のファイルを指す区間を1つだけ返す。
    async fn segment(
        &self,
        asset: &MediaAsset,
        target: Duration,
        out_dir: &Path,
    ) -> Result<Vec<Segment>>;
}

/// 分割戦略の失敗理由
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// ツールを起動できない（再エンコードしても解決しない）
    #[error("{program} を起動できません: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// ツールがシグナルで終了した
    #[error("{program} が中断されました")]
    Interrupted { program: String },

    /// ツールが入力を処理できなかった（未対応のコンテナ、壊れたストリームなど）
    #[error("{program} が失敗しました ({code}): {stderr}")]
    Rejected {
        program: String,
        code: i32,
        stderr: String,
    },
}

impl SplitError {
    /// 再エンコードで回復できる可能性があるか
    pub fn allows_fallback(&self) -> bool {
        matches!(self, SplitError::Rejected { .. })
    }
}

/// ffmpeg による分割
///
/// まずストリームコピー（再エンコードなし）で分割し、失敗した場合は
/// モノラル・固定サンプルレートの MP3 に再エンコードしながら分割する。
pub struct FfmpegSegmenter {
    ffmpeg: String,
    ffprobe: String,
    sample_rate: u32,
    bitrate: String,
}

impl FfmpegSegmenter {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            sample_rate: config.fallback_sample_rate,
            bitrate: config.fallback_bitrate.clone(),
        }
    }

    /// 音声の長さ（秒）を取得
    async fn probe_duration(&self, asset: &MediaAsset) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&asset.path)
            .output()
            .await
            .with_context(|| format!("{} の起動に失敗", self.ffprobe))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} が失敗しました: {}",
                self.ffprobe,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    fn copy_args(&self, asset: &MediaAsset, target: Duration, dir: &Path) -> Vec<String> {
        let extension = if asset.format.is_empty() {
            "mka"
        } else {
            asset.format.as_str()
        };
        let mut args = split_args(asset, target);
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.push(segment_pattern(dir, extension));
        args
    }

    fn reencode_args(&self, asset: &MediaAsset, target: Duration, dir: &Path) -> Vec<String> {
        let mut args = split_args(asset, target);
        args.extend([
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
        ]);
        args.push(segment_pattern(dir, "mp3"));
        args
    }

    async fn run_ffmpeg(&self, args: &[String]) -> std::result::Result<(), SplitError> {
        let output = Command::new(&self.ffmpeg).args(args).output().await;
        classify(&self.ffmpeg, output)
    }

    /// 1つの戦略で分割し、結果の区間一覧を返す
    async fn split_with(
        &self,
        strategy: &str,
        args: &[String],
        dir: &Path,
    ) -> std::result::Result<Vec<Segment>, SplitError> {
        log::debug!("分割 ({}): {} {}", strategy, self.ffmpeg, args.join(" "));
        self.run_ffmpeg(args).await?;

        match collect_segments(dir).await {
            Ok(segments) if !segments.is_empty() => Ok(segments),
            Ok(_) => Err(SplitError::Rejected {
                program: self.ffmpeg.clone(),
                code: 0,
                stderr: "区間ファイルが生成されませんでした".to_string(),
            }),
            Err(e) => Err(SplitError::Rejected {
                program: self.ffmpeg.clone(),
                code: 0,
                stderr: format!("{:#}", e),
            }),
        }
    }
}

#[async_trait]
impl Segmenter for FfmpegSegmenter {
    async fn segment(
        &self,
        asset: &MediaAsset,
        target: Duration,
        out_dir: &Path,
    ) -> Result<Vec<Segment>> {
        let target_secs = target.as_secs_f64();
        if target_secs <= 0.0 {
            anyhow::bail!("区間長は正の値である必要があります");
        }

        match self.probe_duration(asset).await {
            Ok(duration) if duration <= target_secs => {
                log::info!(
                    "音声長 {:.1} 秒は区間長 {:.0} 秒以内のため分割しません",
                    duration,
                    target_secs
                );
                return Ok(vec![Segment::new(0, &asset.path)]);
            }
            Ok(duration) => {
                log::info!(
                    "音声長 {:.1} 秒を {:.0} 秒ごとに分割します",
                    duration,
                    target_secs
                );
            }
            Err(e) => {
                log::warn!("音声長の取得に失敗しました。分割を試みます: {:#}", e);
            }
        }

        let dir = out_dir.join("segments");
        reset_dir(&dir).await?;

        let copy_error = match self
            .split_with("copy", &self.copy_args(asset, target, &dir), &dir)
            .await
        {
            Ok(segments) => {
                log::info!("ストリームコピーで {} 区間に分割しました", segments.len());
                return Ok(segments);
            }
            Err(e) => e,
        };

        if !copy_error.allows_fallback() {
            return Err(anyhow::Error::new(copy_error).context("ストリームコピーでの分割に失敗"));
        }

        log::warn!(
            "ストリームコピーでの分割に失敗しました。再エンコードします: {}",
            copy_error
        );
        reset_dir(&dir).await?;

        let segments = self
            .split_with("re-encode", &self.reencode_args(asset, target, &dir), &dir)
            .await
            .context("再エンコードでの分割に失敗")?;
        log::info!("再エンコードで {} 区間に分割しました", segments.len());
        Ok(segments)
    }
}

/// 両戦略で共通の引数
fn split_args(asset: &MediaAsset, target: Duration) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        asset.path.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-f".to_string(),
        "segment".to_string(),
        "-segment_time".to_string(),
        target.as_secs().max(1).to_string(),
        "-reset_timestamps".to_string(),
        "1".to_string(),
    ]
}

fn segment_pattern(dir: &Path, extension: &str) -> String {
    dir.join(format!("{}%03d.{}", SEGMENT_PREFIX, extension))
        .to_string_lossy()
        .into_owned()
}

/// 外部プロセスの終了状態を分類
fn classify(
    program: &str,
    output: std::io::Result<Output>,
) -> std::result::Result<(), SplitError> {
    let output = output.map_err(|source| SplitError::ToolUnavailable {
        program: program.to_string(),
        source,
    })?;

    if output.status.success() {
        return Ok(());
    }

    match output.status.code() {
        Some(code) => Err(SplitError::Rejected {
            program: program.to_string(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        None => Err(SplitError::Interrupted {
            program: program.to_string(),
        }),
    }
}

/// ffprobe の出力から秒数を取り出す
fn parse_duration(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow::anyhow!("ffprobe の出力が空です"))?;

    let duration: f64 = line
        .parse()
        .with_context(|| format!("音声長のパースに失敗: {:?}", line))?;
    if !duration.is_finite() || duration < 0.0 {
        anyhow::bail!("不正な音声長: {}", duration);
    }
    Ok(duration)
}

/// 区間ディレクトリを空の状態にする
async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("区間ディレクトリの削除に失敗: {:?}", dir));
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("区間ディレクトリの作成に失敗: {:?}", dir))
}

/// 区間ファイルを番号順に列挙する
///
/// ファイルシステムの列挙順には依存せず、ファイル名のゼロ埋め番号で並べる。
/// 番号は0から欠番なく連続している必要がある。
pub async fn collect_segments(dir: &Path) -> Result<Vec<Segment>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("区間ディレクトリの読み込みに失敗: {:?}", dir))?;
    let mut numbered: Vec<(usize, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("区間ディレクトリの読み込みに失敗: {:?}", dir))?
    {
        let path = entry.path();
        if let Some(n) = segment_number(&path) {
            numbered.push((n, path));
        }
    }
    numbered.sort();

    for (expected, (actual, path)) in numbered.iter().enumerate() {
        if *actual != expected {
            anyhow::bail!(
                "区間番号が連続していません: {} の位置に {:?}",
                expected,
                path
            );
        }
    }

    Ok(numbered
        .into_iter()
        .map(|(index, path)| Segment::new(index, path))
        .collect())
}

fn segment_number(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix(SEGMENT_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
