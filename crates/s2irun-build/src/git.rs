//! git によるソース取得
//!
//! clone・checkout・コミット情報の取得を外部の git コマンドに委譲します。

use crate::error::{BuildError, Result};
use crate::runner::{CommandOpts, CommandRunner};
use async_trait::async_trait;
use s2irun_core::SourceDescriptor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const GIT: &str = "git";

/// clone時のオプション
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneConfig {
    pub quiet: bool,
    pub recursive: bool,
}

/// clone後のリポジトリから取得したソース情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub location: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub commit_id: String,
    pub author_name: String,
    pub author_email: String,
    pub date: String,
    pub message: String,
    /// リポジトリ内のコンテキストディレクトリ
    pub context_dir: String,
}

/// ソース管理システムの抽象化
#[async_trait]
pub trait Scm: Send + Sync {
    /// 実行ファイルが利用可能か
    fn has_executable(&self) -> bool;

    /// ソースを `dest` にcloneし、refが指定されていればcheckoutする
    async fn clone(&self, source: &SourceDescriptor, dest: &Path, config: CloneConfig)
    -> Result<()>;

    /// cloneしたリポジトリから情報を取得（取得できない項目は空文字）
    async fn get_info(&self, repo: &Path) -> SourceInfo;
}

pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// 指定refをcheckout
    pub async fn checkout(&self, repo: &Path, reference: &str) -> Result<()> {
        self.runner
            .run_with_options(
                &CommandOpts::in_dir(repo),
                GIT,
                &["checkout".to_string(), reference.to_string()],
            )
            .await
    }

    async fn query(&self, repo: &Path, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match self
            .runner
            .output(&CommandOpts::in_dir(repo), GIT, &args)
            .await
        {
            Ok(out) => out.trim().to_string(),
            Err(e) => {
                tracing::debug!("git {} failed: {}", args.join(" "), e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl Scm for Git {
    fn has_executable(&self) -> bool {
        which::which(GIT).is_ok()
    }

    async fn clone(
        &self,
        source: &SourceDescriptor,
        dest: &Path,
        config: CloneConfig,
    ) -> Result<()> {
        let mut args = vec!["clone".to_string()];
        if config.quiet {
            args.push("--quiet".to_string());
        }
        if config.recursive {
            args.push("--recursive".to_string());
        }
        args.push(source.url().to_string());
        args.push(dest.display().to_string());

        tracing::info!("Cloning {} into {}", source.url(), dest.display());
        self.runner
            .run_with_options(&CommandOpts::default(), GIT, &args)
            .await?;

        if let Some(reference) = source.reference() {
            tracing::info!("Checking out {}", reference);
            self.checkout(dest, reference).await?;
        }
        Ok(())
    }

    async fn get_info(&self, repo: &Path) -> SourceInfo {
        SourceInfo {
            location: self
                .query(repo, &["config", "--get", "remote.origin.url"])
                .await,
            reference: self
                .query(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
                .await,
            commit_id: self.query(repo, &["rev-parse", "--verify", "HEAD"]).await,
            author_name: self
                .query(repo, &["--no-pager", "show", "-s", "--format=%an", "HEAD"])
                .await,
            author_email: self
                .query(repo, &["--no-pager", "show", "-s", "--format=%ae", "HEAD"])
                .await,
            date: self
                .query(repo, &["--no-pager", "show", "-s", "--format=%ad", "HEAD"])
                .await,
            message: self
                .query(repo, &["--no-pager", "show", "-s", "--format=%s", "HEAD"])
                .await,
            context_dir: String::new(),
        }
    }
}

/// git がなければエラー
pub fn require_executable(scm: &dyn Scm) -> Result<()> {
    if scm.has_executable() {
        Ok(())
    } else {
        Err(BuildError::ScmNotFound)
    }
}

/// clone失敗をソースエラーとして分類
pub async fn clone_source(
    scm: &dyn Scm,
    source: &SourceDescriptor,
    dest: &Path,
    config: CloneConfig,
) -> Result<()> {
    scm.clone(source, dest, config)
        .await
        .map_err(|e| BuildError::CloneFailed {
            url: source.url().to_string(),
            message: e.to_string(),
        })
}
