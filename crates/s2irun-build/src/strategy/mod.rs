//! ビルド戦略
//!
//! builderイメージのメタデータと設定から戦略を選び、実行します。
//! - `Dockerfile`: `asDockerfile` 指定時。Dockerfileを出力するだけでデーモンは使わない
//! - `Onbuild`: builderイメージにONBUILDトリガーがある場合
//! - `Layered`: それ以外。生成したDockerfileでデーモンビルド

pub mod dockerfile;
pub mod layered;
pub mod onbuild;

use crate::auth::RegistryAuth;
use crate::docker::{DockerGateway, ImageMetadata};
use crate::error::{BuildError, Result};
use crate::fetch::{FetchedSource, SourceFetcher};
use crate::git::{Scm, SourceInfo};
use crate::scripts::ScriptResolver;
use bollard::auth::DockerCredentials;
use chrono::{DateTime, Local};
use s2irun_core::{BuildConfig, ImageReference, tag};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// ビルドコンテキスト内のソース配置先
pub const UPLOAD_SRC_DIR: &str = "upload/src";

/// clone先（コンテキストディレクトリ適用前）
const CHECKOUT_DIR: &str = "checkout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Layered,
    Onbuild,
    Dockerfile,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Layered => "layered",
            StrategyKind::Onbuild => "onbuild",
            StrategyKind::Dockerfile => "dockerfile",
        };
        f.write_str(name)
    }
}

/// 戦略を選択
pub fn select(cfg: &BuildConfig, builder: Option<&ImageMetadata>) -> StrategyKind {
    if !cfg.as_dockerfile.is_empty() {
        StrategyKind::Dockerfile
    } else if builder.is_some_and(ImageMetadata::has_onbuild) {
        StrategyKind::Onbuild
    } else {
        StrategyKind::Layered
    }
}

/// ビルド結果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub success: bool,
    /// rootlessビルドの場合はNone
    pub strategy: Option<StrategyKind>,
    pub messages: Vec<String>,
    /// デーモンでビルドしたイメージ名（タグ展開済み）
    pub image_name: String,
    pub image_id: String,
    pub source_info: SourceInfo,
}

impl BuildResult {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::rootless()
        }
    }

    pub fn rootless() -> Self {
        Self {
            success: false,
            strategy: None,
            messages: Vec::new(),
            image_name: String::new(),
            image_id: String::new(),
            source_info: SourceInfo::default(),
        }
    }
}

/// デーモンビルドの出力イメージ名（タグ展開 → push先レジストリの付与）
///
/// タグ未指定の場合は空のまま（イメージIDで扱う）。
pub fn output_image_name(
    cfg: &BuildConfig,
    now: &DateTime<Local>,
    commit_id: &str,
) -> Result<String> {
    let rendered = tag::render(&cfg.tag, now, commit_id);
    if rendered.is_empty() {
        return Ok(rendered);
    }
    let reference = ImageReference::parse(&rendered, cfg.push_authentication.registry_host())?;
    Ok(reference.to_string())
}

/// ソース情報から `io.openshift.s2i.*` ラベルを生成し、設定のラベルで上書き
pub fn generate_labels(cfg: &BuildConfig, info: &SourceInfo) -> BTreeMap<String, String> {
    const PREFIX: &str = "io.openshift.s2i.build.";

    let author = match (info.author_name.is_empty(), info.author_email.is_empty()) {
        (false, false) => format!("{} <{}>", info.author_name, info.author_email),
        (false, true) => info.author_name.clone(),
        (true, false) => format!("<{}>", info.author_email),
        (true, true) => String::new(),
    };

    let mut labels: BTreeMap<String, String> = [
        ("image", cfg.builder_image.clone()),
        ("source-location", info.location.clone()),
        ("source-context-dir", info.context_dir.clone()),
        ("commit.id", info.commit_id.clone()),
        ("commit.ref", info.reference.clone()),
        ("commit.author", author),
        ("commit.date", info.date.clone()),
        ("commit.message", info.message.clone()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| (format!("{}{}", PREFIX, key), value))
    .collect();

    labels.extend(cfg.labels.clone());
    labels
}

/// デーモンビルドの作業ディレクトリ（未指定時は一時ディレクトリ）
struct WorkDir {
    path: PathBuf,
    _temp: Option<tempfile::TempDir>,
}

impl WorkDir {
    fn new(configured: Option<&Path>) -> Result<Self> {
        match configured {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Ok(Self {
                    path: path.to_path_buf(),
                    _temp: None,
                })
            }
            None => {
                let temp = tempfile::Builder::new().prefix("s2i-build-").tempdir()?;
                Ok(Self {
                    path: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }
}

/// デーモン経由のビルドに共通の準備結果
pub(crate) struct Prepared<'a> {
    pub cfg: &'a BuildConfig,
    pub docker: &'a DockerGateway,
    pub metadata: &'a ImageMetadata,
    pub work_dir: &'a Path,
    pub source: FetchedSource,
    pub tag: String,
    pub labels: BTreeMap<String, String>,
    pub pull_credentials: Option<DockerCredentials>,
}

impl Prepared<'_> {
    pub fn timeout(&self) -> Option<Duration> {
        self.cfg.build_timeout_seconds.map(Duration::from_secs)
    }
}

pub struct StrategyExecutor {
    docker: Option<Arc<DockerGateway>>,
    fetcher: SourceFetcher,
    scripts: ScriptResolver,
    auth: RegistryAuth,
}

impl StrategyExecutor {
    /// `docker` が None の場合は `asDockerfile` のビルドのみ可能
    pub fn new(docker: Option<Arc<DockerGateway>>, scm: Arc<dyn Scm>) -> Result<Self> {
        Ok(Self {
            docker,
            fetcher: SourceFetcher::new(scm)?,
            scripts: ScriptResolver::new()?,
            auth: RegistryAuth::new(),
        })
    }

    /// 戦略を選んでビルドを実行
    pub async fn execute(&self, cfg: &BuildConfig) -> Result<BuildResult> {
        if select(cfg, None) == StrategyKind::Dockerfile {
            tracing::info!("Using dockerfile strategy");
            return dockerfile::build(self, cfg).await;
        }

        let docker = self.docker.as_deref().ok_or_else(|| {
            BuildError::DaemonUnreachable("no Docker client is configured".to_string())
        })?;

        let pull_credentials = self
            .auth
            .pull_credentials(&cfg.builder_image, &cfg.pull_authentication)?;
        docker
            .ensure_image(
                &cfg.builder_image,
                cfg.builder_pull_policy(),
                pull_credentials.clone(),
                true,
            )
            .await?;
        let metadata = docker.inspect(&cfg.builder_image).await?;

        let kind = select(cfg, Some(&metadata));
        tracing::info!("Using {} strategy", kind);

        let work_dir = WorkDir::new(cfg.working_dir.as_deref())?;
        let source = self.stage_source(cfg, &work_dir.path).await?;
        let tag = output_image_name(cfg, &Local::now(), &source.info.commit_id)?;
        let labels = generate_labels(cfg, &source.info);

        let prepared = Prepared {
            cfg,
            docker,
            metadata: &metadata,
            work_dir: &work_dir.path,
            source,
            tag,
            labels,
            pull_credentials,
        };

        let mut result = match kind {
            StrategyKind::Onbuild => onbuild::build(&prepared).await?,
            _ => layered::build(self, &prepared).await?,
        };
        result.source_info = prepared.source.info.clone();

        if cfg.run_image {
            let target = if result.image_name.is_empty() {
                result.image_id.clone()
            } else {
                result.image_name.clone()
            };
            let container = format!("s2i-run-{}", std::process::id());
            let code = docker.run_image(&target, &container).await?;
            if code != 0 {
                return Err(BuildError::BuildFailed(format!(
                    "container for {} exited with status {}",
                    target, code
                )));
            }
            result
                .messages
                .push(format!("Container for {} exited successfully", target));
        }

        Ok(result)
    }

    /// ソースを取得して `<dir>/upload/src` に配置
    pub(crate) async fn stage_source(&self, cfg: &BuildConfig, dir: &Path) -> Result<FetchedSource> {
        let source = cfg.source()?;
        let checkout = dir.join(CHECKOUT_DIR);
        let upload_src = dir.join(UPLOAD_SRC_DIR);
        for stale in [&checkout, &upload_src] {
            if stale.exists() {
                std::fs::remove_dir_all(stale)?;
            }
        }
        if let Some(parent) = upload_src.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut fetched = self.fetcher.fetch(source, &checkout).await?;
        std::fs::rename(&fetched.root, &upload_src)?;
        if checkout.exists() {
            std::fs::remove_dir_all(&checkout)?;
        }
        fetched.root = upload_src;
        Ok(fetched)
    }
}
