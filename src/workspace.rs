use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// リクエスト単位の作業ディレクトリ
///
/// ダウンロードした音声と分割した区間ファイルはすべてこの中に置く。
/// `cleanup` を呼び忘れても、ドロップ時に必ず削除される。
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// `root` 配下に一意な名前のディレクトリを作成
    ///
    /// `root` が空の場合はシステムの一時ディレクトリを使用する。
    pub async fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = if root.as_ref().as_os_str().is_empty() {
            std::env::temp_dir()
        } else {
            root.as_ref().to_path_buf()
        };

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let name = format!(
            "video-topics_{}_{}_{}",
            timestamp,
            std::process::id(),
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        );
        let path = root.join(name);

        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("作業ディレクトリの作成に失敗: {:?}", path))?;
        log::debug!("作業ディレクトリ作成: {:?}", path);

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 作業ディレクトリ内のパス
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// 作業ディレクトリごと削除（2回目以降は何もしない）
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;

        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                log::debug!("作業ディレクトリ削除: {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("作業ディレクトリが見つかりません: {:?}", self.path);
                Ok(())
            }
            Err(e) => Err(e)
                .with_context(|| format!("作業ディレクトリの削除に失敗: {:?}", self.path)),
        }
    }
}

impl Drop for Workspace {
    // cleanup が呼ばれなかった場合（キャンセル・パニック）のみ同期的に削除する
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::error!("Workspace のドロップ時にエラー: {:?}: {}", self.path, e);
            }
        }
    }
}
