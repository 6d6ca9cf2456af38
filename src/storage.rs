use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

use tracing::{info, warn};

use crate::atomic::{AtomicFile, is_temp_name};
use crate::error::StorageError;

/// 以单一目录为唯一持久化来源的录音存储。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// 目录中的一个普通文件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将文件名解析为根目录下的路径，只接受单个普通路径段。
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidPath),
        }
    }

    /// 解析已存在的文件；符号链接、目录与上传暂存文件都不视为托管文件。
    pub async fn resolve_file(&self, name: &str) -> Result<PathBuf, StorageError> {
        if is_temp_name(name) {
            return Err(StorageError::InvalidPath);
        }
        let target = self.resolve(name)?;
        let metadata = fs::symlink_metadata(&target).await?;
        if metadata.file_type().is_symlink() || !metadata.is_file() {
            return Err(StorageError::InvalidPath);
        }
        Ok(target)
    }

    /// 枚举根目录下的普通文件（不含子目录、符号链接与上传暂存文件）。
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_name(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // 枚举期间被删除的文件直接跳过
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            files.push(StoredFile {
                name,
                size: metadata.len(),
            });
        }

        Ok(files)
    }

    pub async fn count_files(&self) -> Result<usize, StorageError> {
        Ok(self.list_files().await?.len())
    }

    /// 启动时清理上次进程遗留的上传暂存文件，返回删除的数量。
    pub async fn sweep_staged(&self) -> Result<usize, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            if !is_temp_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = ?path, "removed stale upload temp file");
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = ?path, error = %err, "failed to remove stale upload temp file"),
            }
        }
        Ok(removed)
    }

    /// 在根目录创建上传暂存文件。
    pub async fn stage_upload(&self) -> Result<AtomicFile, StorageError> {
        AtomicFile::create_in(&self.root).await
    }

    /// 将暂存文件提交为 `name`，返回落盘后的文件大小。
    pub async fn commit_upload(&self, staged: AtomicFile, name: &str) -> Result<u64, StorageError> {
        let target = match self.resolve(name) {
            Ok(target) => target,
            Err(err) => {
                staged.cleanup().await;
                return Err(err);
            }
        };
        staged.finalize(&target).await?;
        Ok(fs::metadata(&target).await?.len())
    }
}
