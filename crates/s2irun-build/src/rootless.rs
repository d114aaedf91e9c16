//! デーモンを使わないビルド（kaniko互換の外部ビルダー）
//!
//! clone → タグ決定 → 認証情報の書き出し → 外部ビルダーでビルドとpush →
//! レジストリからタグ情報を取得して結果を記録、の順に実行します。

use crate::auth::{kaniko_docker_config_dir, write_docker_config};
use crate::error::{BuildError, Result};
use crate::git::{CloneConfig, Scm, clone_source, require_executable};
use crate::reporter::{OutputResultInfo, RegistryClient, ResultSink, record_result};
use crate::runner::{CommandOpts, CommandRunner};
use crate::strategy::BuildResult;
use chrono::{DateTime, Local};
use s2irun_core::{BuildConfig, ImageReference, tag};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct RootlessExecutor {
    exec_path: PathBuf,
    scm: Arc<dyn Scm>,
    runner: Arc<dyn CommandRunner>,
    registry: RegistryClient,
    sink: Arc<dyn ResultSink>,
    docker_config_dir: PathBuf,
    now: Option<DateTime<Local>>,
}

impl RootlessExecutor {
    pub fn new(
        exec_path: impl Into<PathBuf>,
        scm: Arc<dyn Scm>,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        Ok(Self {
            exec_path: exec_path.into(),
            scm,
            runner,
            registry: RegistryClient::new()?,
            sink,
            docker_config_dir: kaniko_docker_config_dir(),
            now: None,
        })
    }

    /// 外部ビルダーの実行ファイルが存在するか
    pub fn is_available(exec_path: &Path) -> bool {
        !exec_path.as_os_str().is_empty() && exec_path.exists()
    }

    pub fn with_registry(mut self, registry: RegistryClient) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_docker_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docker_config_dir = dir.into();
        self
    }

    /// `${DATE}` 展開に使う時刻を固定
    pub fn with_now(mut self, now: DateTime<Local>) -> Self {
        self.now = Some(now);
        self
    }

    /// 最終的なイメージ参照（タグ展開 → 名前空間の付与 → レジストリの付与）
    pub fn resolve_reference(
        &self,
        cfg: &BuildConfig,
        commit_id: &str,
    ) -> Result<ImageReference> {
        let now = self.now.unwrap_or_else(Local::now);
        let rendered = tag::render(&cfg.tag, &now, commit_id);
        let qualified = tag::qualify_namespace(&rendered, &cfg.push_authentication.username);
        let reference =
            ImageReference::parse(&qualified, cfg.push_authentication.registry_host())?;
        Ok(reference)
    }

    pub async fn execute(&self, cfg: &BuildConfig) -> Result<BuildResult> {
        let source = cfg.source()?;
        let mut result = BuildResult::rootless();

        require_executable(self.scm.as_ref())?;

        if cfg.context_dir.as_os_str().is_empty() {
            return Err(BuildError::InvalidConfig(
                "contextDir is required for rootless builds".to_string(),
            ));
        }
        std::fs::create_dir_all(&cfg.context_dir)?;
        clone_source(
            self.scm.as_ref(),
            source,
            &cfg.context_dir,
            CloneConfig {
                quiet: true,
                recursive: true,
            },
        )
        .await?;
        let info = self.scm.get_info(&cfg.context_dir).await;
        let build_context = match source.context_dir() {
            Some(dir) => cfg.context_dir.join(dir),
            None => cfg.context_dir.clone(),
        };

        let reference = self.resolve_reference(cfg, &info.commit_id)?;
        tracing::info!("Image will be pushed as {}", reference);

        let server = cfg.push_authentication.registry_host().to_string();
        write_docker_config(&self.docker_config_dir, &cfg.push_authentication)?;

        let args = vec![
            "--dockerfile".to_string(),
            build_context.join("Dockerfile").display().to_string(),
            "--context".to_string(),
            build_context.display().to_string(),
            "--skip-tls-verify-registry".to_string(),
            server,
            "--destination".to_string(),
            reference.to_string(),
        ];
        let opts = CommandOpts::streaming()
            .with_timeout(cfg.build_timeout_seconds.map(Duration::from_secs));
        let program = self.exec_path.display().to_string();
        self.runner
            .run_with_options(&opts, &program, &args)
            .await
            .map_err(|e| BuildError::ExternalTool(e.to_string()))?;
        result
            .messages
            .push(format!("Pushed image {}", reference));

        let tag_info = self
            .registry
            .get_tag_info(&reference.repository, &reference.tag, &cfg.push_authentication)
            .await;
        record_result(
            self.sink.as_ref(),
            &OutputResultInfo::from_tag_info(&reference, tag_info),
        );

        result.image_name = reference.to_string();
        result.source_info = info;
        result.success = true;
        Ok(result)
    }
}
