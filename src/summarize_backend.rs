use anyhow::Result;
use async_trait::async_trait;

/// 要約バックエンドの共通トレイト
///
/// プロンプトは常に [`crate::topics::PromptTemplate`] で組み立てたものが渡される。
/// 戻り値は自由形式のテキスト（箇条書きであることは保証されない）。
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str, target_count: usize) -> Result<String>;
}
