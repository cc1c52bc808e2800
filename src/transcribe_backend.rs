use anyhow::Result;
use async_trait::async_trait;

/// 文字起こしに渡す音声データ
///
/// `file_name` の拡張子でプロバイダ側が形式を判定する。
#[derive(Clone, Debug)]
pub struct AudioClip {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// 文字起こしバックエンドの共通トレイト
///
/// 音声バイト列を受け取り、プレーンテキストを返すか失敗する。
/// それ以上の前提は置かない。
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: AudioClip) -> Result<String>;
}
