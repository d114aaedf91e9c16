//! ソースの取得
//!
//! ロケーターの種類に応じて clone・ローカルディレクトリのコピー・
//! バイナリアーカイブのダウンロードと展開を行います。

use crate::context::{copy_dir, extract_archive};
use crate::error::{BuildError, Result};
use crate::git::{CloneConfig, Scm, SourceInfo, clone_source, require_executable};
use s2irun_core::{LocatorKind, SourceDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// 取得済みのソース
#[derive(Debug, Clone)]
pub struct FetchedSource {
    /// ビルドに使うディレクトリ（コンテキストディレクトリ適用後）
    pub root: PathBuf,
    pub info: SourceInfo,
}

pub struct SourceFetcher {
    scm: Arc<dyn Scm>,
    http: reqwest::Client,
}

impl SourceFetcher {
    pub fn new(scm: Arc<dyn Scm>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BuildError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { scm, http })
    }

    /// ソースを `dest` に配置する
    pub async fn fetch(&self, source: &SourceDescriptor, dest: &Path) -> Result<FetchedSource> {
        tracing::info!("Fetching source {}", source);

        let mut info = if source.is_binary() {
            self.fetch_binary(source, dest).await?;
            SourceInfo {
                location: source.url().to_string(),
                ..Default::default()
            }
        } else {
            match (source.kind(), source.local_path()) {
                (LocatorKind::Local, Some(path)) if source.reference().is_none() => {
                    self.copy_local(source, &path, dest)?;
                    if path.join(".git").exists() {
                        self.scm.get_info(dest).await
                    } else {
                        SourceInfo {
                            location: source.url().to_string(),
                            ..Default::default()
                        }
                    }
                }
                _ => {
                    require_executable(self.scm.as_ref())?;
                    clone_source(
                        self.scm.as_ref(),
                        source,
                        dest,
                        CloneConfig {
                            quiet: true,
                            recursive: true,
                        },
                    )
                    .await?;
                    self.scm.get_info(dest).await
                }
            }
        };

        let root = match source.context_dir() {
            Some(dir) => {
                let root = dest.join(dir);
                if !root.is_dir() {
                    return Err(BuildError::SourceFetch {
                        url: source.url().to_string(),
                        message: format!("context directory '{}' does not exist", dir),
                    });
                }
                info.context_dir = dir.to_string();
                root
            }
            None => dest.to_path_buf(),
        };

        if info.location.is_empty() {
            info.location = source.url().to_string();
        }
        Ok(FetchedSource { root, info })
    }

    fn copy_local(&self, source: &SourceDescriptor, path: &Path, dest: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(BuildError::SourceFetch {
                url: source.url().to_string(),
                message: "local source directory does not exist".to_string(),
            });
        }
        tracing::debug!("Copying {} to {}", path.display(), dest.display());
        copy_dir(path, dest)
    }

    async fn fetch_binary(&self, source: &SourceDescriptor, dest: &Path) -> Result<()> {
        let fetch_error = |message: String| BuildError::SourceFetch {
            url: source.url().to_string(),
            message,
        };

        if let Some(path) = source.local_path() {
            if path.is_dir() {
                return copy_dir(&path, dest);
            }
            let data = std::fs::read(&path).map_err(|e| fetch_error(e.to_string()))?;
            return extract_archive(&data, dest).map_err(|e| fetch_error(e.to_string()));
        }

        tracing::info!("Downloading {}", source.url());
        let response = self
            .http
            .get(source.url())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(e.to_string()))?;
        let data = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        tracing::debug!("Downloaded {} bytes", data.len());
        extract_archive(&data, dest).map_err(|e| fetch_error(e.to_string()))
    }
}
