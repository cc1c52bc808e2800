use futures_util::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// 固定数のワーカーで処理する有界ワーカープール
///
/// 文字起こしとトピック抽出の両方のファンアウトで共有する。
/// 各作業は投入時のインデックスでタグ付けされ、結果は完了順に
/// `(index, output)` として返る。並べ替えは呼び出し側の責務。
///
/// 実行中の作業は途中でキャンセルされない。`run` / `run_until` は
/// すべてのワーカーが終了するまで戻らない。
#[derive(Clone, Debug)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
}

impl WorkerPool {
    /// `workers` が 0 の場合は 1 として扱う
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            workers: workers.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.workers
    }

    /// すべての作業を実行して結果を完了順に返す
    ///
    /// ワーカーがパニックした場合、その作業の結果は含まれない。
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<(usize, R)>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.run_until(items, work, |_: &R| false).await
    }

    /// `stop` が真を返す結果が出た時点で、キュー上の残りの作業を打ち切る
    ///
    /// 実行中の作業は最後まで処理され、その結果も返る。
    /// 打ち切られた作業の結果は含まれない。
    pub async fn run_until<T, R, F, Fut, S>(
        &self,
        items: Vec<T>,
        work: F,
        stop: S,
    ) -> Vec<(usize, R)>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        S: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        // タスクキュー: 全作業を先に積んでから送信側を閉じる
        let (task_tx, task_rx) = mpsc::channel::<(usize, T)>(total);
        for (index, item) in items.into_iter().enumerate() {
            if task_tx.send((index, item)).await.is_err() {
                break;
            }
        }
        drop(task_tx);

        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, R)>(total);
        let work = Arc::new(work);
        let stop = Arc::new(stop);
        let aborted = Arc::new(AtomicBool::new(false));

        let worker_count = self.workers.min(total);
        log::debug!(
            "{}: {} 件を {} ワーカーで処理",
            self.name,
            total,
            worker_count
        );

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let work = Arc::clone(&work);
            let stop = Arc::clone(&stop);
            let aborted = Arc::clone(&aborted);
            let name = self.name;

            handles.push(tokio::spawn(async move {
                loop {
                    if aborted.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = {
                        let mut rx = task_rx.lock().await;
                        rx.recv().await
                    }; // ロックを解放してから処理する

                    let Some((index, item)) = next else {
                        break;
                    };

                    log::debug!("{}: ワーカー {} が #{} を処理中", name, worker_id, index);
                    let output = work(index, item).await;
                    if stop(&output) && !aborted.swap(true, Ordering::SeqCst) {
                        log::debug!("{}: #{} の結果により残りの作業を打ち切ります", name, index);
                    }

                    if result_tx.send((index, output)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                log::error!("{}: ワーカーが異常終了しました: {}", self.name, e);
            }
        }

        if results.len() < total && aborted.load(Ordering::SeqCst) {
            log::info!(
                "{}: {} 件中 {} 件を打ち切りました",
                self.name,
                total,
                total - results.len()
            );
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_are_tagged_with_submission_index() {
        let pool = WorkerPool::new("test", 3);
        let items = vec![30u64, 10, 20, 0];

        let mut results = pool
            .run(items, |_, delay_ms| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms * 2
            })
            .await;

        assert_eq!(results.len(), 4);
        results.sort_by_key(|(index, _)| *index);
        assert_eq!(results, vec![(0, 60), (1, 20), (2, 40), (3, 0)]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("test", 2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            pool.run((0..8).collect::<Vec<u32>>(), move |_, _| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
        };

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_stop_skips_queued_items() {
        let pool = WorkerPool::new("test", 1);
        let started = Arc::new(AtomicUsize::new(0));

        let results = {
            let started = Arc::clone(&started);
            pool.run_until(
                (0..6).collect::<Vec<u32>>(),
                move |_, n| {
                    started.fetch_add(1, Ordering::SeqCst);
                    async move { if n == 1 { Err(n) } else { Ok(n) } }
                },
                |result: &Result<u32, u32>| result.is_err(),
            )
            .await
        };

        // 1ワーカーなので #1 の失敗以降は何も取り出されない
        assert_eq!(started.load(Ordering::SeqCst), 2);
        let mut results = results;
        results.sort_by_key(|(index, _)| *index);
        assert_eq!(results, vec![(0, Ok(0)), (1, Err(1))]);
    }

    #[tokio::test]
    async fn test_stop_keeps_in_flight_results() {
        let pool = WorkerPool::new("test", 3);
        let results = pool
            .run_until(
                vec![0u64, 20, 20, 20, 20, 20],
                |_, delay_ms| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms
                },
                |delay_ms: &u64| *delay_ms == 0,
            )
            .await;

        // #0 の完了後は新しい作業を取り出さない
        assert!(results.iter().any(|(index, _)| *index == 0));
        assert!(results.len() < 6);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let pool = WorkerPool::new("test", 3);
        let results = pool.run(Vec::<u8>::new(), |_, x| async move { x }).await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_workers_is_one() {
        assert_eq!(WorkerPool::new("test", 0).size(), 1);
    }
}
