//! 上传暂存文件：先写入隐藏临时文件，落盘后再原子替换为目标文件。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;

pub const TEMP_FILE_PREFIX: &str = ".upload.tmp.";

/// 是否为上传暂存文件名。
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX)
}

/// 存储目录内的暂存文件，目标文件名在写入完成后才确定。
///
/// 未经 `finalize`/`cleanup` 就被丢弃时（客户端断开、请求被取消），
/// 在 `Drop` 中尽力删除暂存文件。
pub struct AtomicFile {
    temp_path: PathBuf,
    file: Option<File>,
    written: u64,
    settled: bool,
}

impl AtomicFile {
    /// 在目录内创建暂存文件。
    pub async fn create_in(dir: &Path) -> Result<Self, StorageError> {
        let temp_path = dir.join(format!("{TEMP_FILE_PREFIX}{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            temp_path,
            file: Some(file),
            written: 0,
            settled: false,
        })
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("staged upload already closed"))
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.handle()?.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// 已写入的字节数。
    pub fn written(&self) -> u64 {
        self.written
    }

    /// 放弃并清理暂存文件。
    pub async fn cleanup(mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.temp_path).await;
        self.settled = true;
    }

    /// flush + fsync 后重命名到目标路径；同名文件直接覆盖。
    pub async fn finalize(mut self, target: &Path) -> Result<(), StorageError> {
        let synced = async {
            let file = self.handle()?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = synced {
            self.cleanup().await;
            return Err(err.into());
        }
        self.file.take();

        if let Err(err) = fs::rename(&self.temp_path, target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(target).await.is_ok() {
                    if let Err(err) = fs::rename(&self.temp_path, target).await {
                        self.cleanup().await;
                        return Err(err.into());
                    }
                } else {
                    self.cleanup().await;
                    return Err(err.into());
                }
            }
            #[cfg(not(windows))]
            {
                self.cleanup().await;
                return Err(err.into());
            }
        }
        self.settled = true;

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.file.take();
        let _ = std::fs::remove_file(&self.temp_path);
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
