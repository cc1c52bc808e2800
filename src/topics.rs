use crate::config::PromptConfig;
use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::summarize_backend::Summarizer;
use crate::types::{TextChunk, TopicCandidate, TopicSet};
use crate::worker_pool::WorkerPool;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// 要約プロンプトのテンプレート
///
/// 指示文の `{count}` をトピック数に置換し、空行の後に本文
/// （文字起こし全文・チャンク・候補の箇条書きのいずれか）を続ける。
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    instruction: String,
}

impl PromptTemplate {
    pub fn new<S: Into<String>>(instruction: S) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(config.instruction.clone())
    }

    pub fn instruction(&self, count: usize) -> String {
        self.instruction.replace("{count}", &count.to_string())
    }

    /// 文字起こし（全文またはチャンク）用のプロンプト
    pub fn for_text(&self, count: usize, text: &str) -> String {
        format!("{}\n\n{}", self.instruction(count), text)
    }

    /// 統合呼び出し用のプロンプト（候補を箇条書きで渡す）
    pub fn for_candidates(&self, count: usize, candidates: &[TopicCandidate]) -> String {
        let list = candidates
            .iter()
            .map(|c| format!("- {}", c.raw.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        self.for_text(count, &list)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^(?:[-*+•‣◦▪–—]\s*|\d{1,3}[.)](?:\s+|$)|\(\d{1,3}\)\s*)+").unwrap()
    })
}

/// 自由形式の応答をトピックのリストに分解
///
/// 行ごとに分け、箇条書き記号・番号（`-`, `*`, `•`, `1.`, `2)`, `(3)` など）と
/// Markdown の強調記号、前後の空白を取り除く。空になった行は捨てる。
///
/// 記号付きの行が1つでもあれば、記号のない行（前置き・締めの文）は捨てる。
/// 番号の後ろには空白か行末が必要（`3.5 Sonnet` は番号とみなさない）。
///
/// # Examples
///
/// ```
/// # use video_topics::topics::parse_topics;
/// let topics = parse_topics("Tópicos:\n1. Ownership\n2) **Borrowing**\n\n- Lifetimes");
/// assert_eq!(topics, vec!["Ownership", "Borrowing", "Lifetimes"]);
/// ```
pub fn parse_topics(text: &str) -> Vec<String> {
    let lines: Vec<(bool, String)> = text
        .lines()
        .map(|line| {
            let line = line.replace("**", "");
            let line = line.trim();
            let marked = list_marker().is_match(line);
            (marked, list_marker().replace(line, "").trim().to_string())
        })
        .collect();

    let any_marked = lines.iter().any(|(marked, _)| *marked);
    lines
        .into_iter()
        .filter(|(marked, line)| (*marked || !any_marked) && !line.is_empty())
        .map(|(_, line)| line)
        .collect()
}

/// 大文字小文字を区別せずに重複を除去（最初に出現した表記を残す）
pub fn dedup_candidates(candidates: Vec<TopicCandidate>) -> Vec<TopicCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| !c.key.is_empty() && seen.insert(c.key.clone()))
        .collect()
}

/// トピック抽出（ファンアウト/ファンイン + 統合）
///
/// チャンクが1つなら要約を1回だけ呼ぶ。複数なら各チャンクから候補を
/// 並列に集め、重複除去した候補リストを1回の統合呼び出しで最終結果にする。
///
/// チャンク単位の失敗は候補0件として扱い、処理は続行する。
/// 統合呼び出しの失敗はリクエスト全体の失敗になる。
pub struct TopicExtractor {
    summarizer: Arc<dyn Summarizer>,
    template: Arc<PromptTemplate>,
    pool: WorkerPool,
    retry: RetryPolicy,
}

impl TopicExtractor {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        template: PromptTemplate,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            summarizer,
            template: Arc::new(template),
            pool: WorkerPool::new("トピック抽出", workers),
            retry,
        }
    }

    pub async fn extract(
        &self,
        chunks: Vec<TextChunk>,
        target_count: usize,
    ) -> Result<TopicSet, PipelineError> {
        match chunks.len() {
            0 => Err(PipelineError::TopicExtractionFailed {
                message: "文字起こしが空です".to_string(),
            }),
            1 => {
                let prompt = self.template.for_text(target_count, &chunks[0].text);
                self.summarize_final(&prompt, target_count).await
            }
            _ => self.extract_chunked(chunks, target_count).await,
        }
    }

    async fn extract_chunked(
        &self,
        chunks: Vec<TextChunk>,
        target_count: usize,
    ) -> Result<TopicSet, PipelineError> {
        let total = chunks.len();
        log::info!("{} チャンクから候補トピックを抽出します", total);

        let summarizer = Arc::clone(&self.summarizer);
        let template = Arc::clone(&self.template);
        let retry = self.retry;

        let results = self
            .pool
            .run(chunks, move |index, chunk: TextChunk| {
                let summarizer = Arc::clone(&summarizer);
                let template = Arc::clone(&template);
                async move {
                    let prompt = template.for_text(target_count, &chunk.text);
                    let label = format!("チャンク {}", index);
                    retry
                        .run(&label, || summarizer.summarize(&prompt, target_count))
                        .await
                        .map(|response| {
                            parse_topics(&response)
                                .into_iter()
                                .take(target_count)
                                .map(TopicCandidate::new)
                                .collect::<Vec<_>>()
                        })
                }
            })
            .await;

        // 完了順に追加（順序は統合呼び出しで付け直される）
        let mut candidates = Vec::new();
        let mut failed = total - results.len();
        for (index, result) in results {
            match result {
                Ok(found) => {
                    log::debug!("チャンク {}: 候補 {} 件", index, found.len());
                    candidates.extend(found);
                }
                Err(e) => {
                    failed += 1;
                    log::warn!("チャンク {} のトピック抽出に失敗しました（スキップ）: {:#}", index, e);
                }
            }
        }

        let unique = dedup_candidates(candidates);
        log::info!(
            "候補トピック {} 件（重複除去後）、失敗チャンク {}/{}",
            unique.len(),
            failed,
            total
        );

        if unique.is_empty() {
            return Err(PipelineError::TopicExtractionFailed {
                message: "どのチャンクからも候補トピックが得られませんでした".to_string(),
            });
        }

        let prompt = self.template.for_candidates(target_count, &unique);
        self.summarize_final(&prompt, target_count).await
    }

    /// 最終結果を得る呼び出し（失敗は致命的）
    async fn summarize_final(
        &self,
        prompt: &str,
        target_count: usize,
    ) -> Result<TopicSet, PipelineError> {
        let response = self
            .retry
            .run("トピック統合", || self.summarizer.summarize(prompt, target_count))
            .await
            .map_err(|e| PipelineError::TopicExtractionFailed {
                message: PipelineError::describe(&e),
            })?;

        let topics = parse_topics(&response);
        if topics.is_empty() {
            return Err(PipelineError::TopicExtractionFailed {
                message: "要約の応答からトピックを読み取れませんでした".to_string(),
            });
        }
        Ok(TopicSet::new(topics))
    }
}
