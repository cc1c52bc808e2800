use serde::Serialize;
use std::path::{Path, PathBuf};

/// ダウンロード済みの音声ファイル
///
/// 1リクエストの間だけパイプラインが所有し、終了時に必ず削除される
/// (削除は [`crate::workspace::Workspace`] が担当)。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaAsset {
    /// ファイルパス
    pub path: PathBuf,

    /// コンテナ形式 (拡張子、例: "mp3")
    pub format: String,
}

impl MediaAsset {
    /// パスから作成（形式は拡張子から推定）
    ///
    /// # Examples
    ///
    /// ```
    /// # use video_topics::types::MediaAsset;
    /// let asset = MediaAsset::from_path("/tmp/audio.mp3");
    /// assert_eq!(asset.format, "mp3");
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = extension_of(&path);
        Self { path, format }
    }
}

/// 時間で区切られた音声の一区間
///
/// `index` は0始まりで連続しており、出力順序を決める。
/// 開始位置は `index × 目標区間長` で暗黙に決まる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub path: PathBuf,
}

impl Segment {
    pub fn new<P: AsRef<Path>>(index: usize, path: P) -> Self {
        Self {
            index,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Whisper に渡すファイル名
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("segment_{:03}.{}", self.index, extension_of(&self.path)))
    }
}

/// 文字起こし結果
///
/// `fragments[i]` は常に区間 `i` に対応する（完了順とは無関係）。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    pub fragments: Vec<String>,
}

impl Transcript {
    /// 区切り文字
    pub const SEPARATOR: &'static str = "\n";

    pub fn new(fragments: Vec<String>) -> Self {
        Self { fragments }
    }

    /// 区間順に改行で連結したテキスト
    pub fn text(&self) -> String {
        self.fragments.join(Self::SEPARATOR)
    }

    pub fn is_blank(&self) -> bool {
        self.fragments.iter().all(|f| f.trim().is_empty())
    }
}

/// 文字数上限で区切られたテキストチャンク
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

impl TextChunk {
    /// 文字数（バイト数ではない）
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// チャンク1つから提案されたトピック候補
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicCandidate {
    /// 元の表記
    pub raw: String,

    /// 重複判定用キー（前後の空白を除去して小文字化）
    pub key: String,
}

impl TopicCandidate {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        let raw = raw.into();
        let key = raw.trim().to_lowercase();
        Self { raw, key }
    }
}

/// 最終的なトピック一覧
///
/// # JSON出力例
///
/// ```json
/// { "topics": ["Introdução ao Rust", "Ownership", "Concorrência"] }
/// ```
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TopicSet {
    pub topics: Vec<String>,
}

impl TopicSet {
    pub fn new(topics: Vec<String>) -> Self {
        Self { topics }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
