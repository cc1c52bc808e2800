use crate::config::RetryConfig;
use anyhow::Result;
use std::future::Future;

/// リモート呼び出しの試行回数ポリシー
///
/// デフォルトは1回（失敗したら即座にエラー）。バックオフは行わない。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fail_fast()
    }
}

impl RetryPolicy {
    pub fn fail_fast() -> Self {
        Self { max_attempts: 1 }
    }

    /// 0 は 1 として扱う
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `op` を最大 `max_attempts` 回実行し、最後のエラーを返す
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    log::warn!(
                        "{}: 試行 {}/{} 失敗、再試行します: {:#}",
                        label,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fail_fast_calls_once() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::fail_fast()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::new(3)
            .run("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    anyhow::bail!("transient")
                }
                Ok(n)
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_attempts_is_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }
}
