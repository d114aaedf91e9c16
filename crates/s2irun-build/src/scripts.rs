//! assemble/run/save-artifacts スクリプトの解決
//!
//! スクリプトごとに次の順で探します。
//! 1. 設定の `scriptsUrl`
//! 2. ソースの `.s2i/bin`
//! 3. builderイメージの `io.openshift.s2i.scripts-url` ラベル（既定 `image:///usr/libexec/s2i`）
//!
//! `image://` はイメージ内のパスとしてそのまま使い、それ以外は
//! `upload/scripts` に配置してイメージへコピーします。

use crate::error::{BuildError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ASSEMBLE: &str = "assemble";
pub const RUN: &str = "run";
pub const SAVE_ARTIFACTS: &str = "save-artifacts";

pub const SCRIPTS_URL_LABEL: &str = "io.openshift.s2i.scripts-url";
pub const DEFAULT_SCRIPTS_URL: &str = "image:///usr/libexec/s2i";

/// ビルドコンテキスト内のスクリプト配置先
pub const UPLOAD_SCRIPTS_DIR: &str = "upload/scripts";
/// イメージ内のスクリプト配置先
pub const IMAGE_SCRIPTS_DIR: &str = "/tmp/scripts";

const SOURCE_SCRIPTS_DIR: &str = ".s2i/bin";

/// 解決したスクリプトの場所
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptLocation {
    /// `upload/scripts` に配置済み
    Uploaded,
    /// builderイメージ内の絶対パス
    Image(String),
}

impl ScriptLocation {
    /// コンテナ内で実行するパス
    pub fn container_path(&self, name: &str) -> String {
        match self {
            ScriptLocation::Uploaded => format!("{}/{}", IMAGE_SCRIPTS_DIR, name),
            ScriptLocation::Image(path) => path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scripts {
    pub assemble: ScriptLocation,
    pub run: ScriptLocation,
    pub save_artifacts: Option<ScriptLocation>,
}

impl Scripts {
    /// `upload/scripts` のコピーが必要か
    pub fn has_uploaded(&self) -> bool {
        [Some(&self.assemble), Some(&self.run), self.save_artifacts.as_ref()]
            .into_iter()
            .flatten()
            .any(|s| *s == ScriptLocation::Uploaded)
    }

    pub fn assemble_path(&self) -> String {
        self.assemble.container_path(ASSEMBLE)
    }

    pub fn run_path(&self) -> String {
        self.run.container_path(RUN)
    }

    pub fn save_artifacts_path(&self) -> Option<String> {
        self.save_artifacts
            .as_ref()
            .map(|s| s.container_path(SAVE_ARTIFACTS))
    }
}

/// スクリプトの取得元
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Image(String),
    Http(String),
    Dir(PathBuf),
}

impl Origin {
    fn parse(url: &str) -> Self {
        if let Some(path) = url.strip_prefix("image://") {
            Origin::Image(path.to_string())
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Origin::Http(url.to_string())
        } else {
            Origin::Dir(PathBuf::from(url.strip_prefix("file://").unwrap_or(url)))
        }
    }
}

pub struct ScriptResolver {
    http: reqwest::Client,
}

impl ScriptResolver {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BuildError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// スクリプトを解決し、必要なものを `<work_dir>/upload/scripts` に配置
    ///
    /// `save-artifacts` は `want_save_artifacts` の場合のみ探し、見つからなくてもエラーにしません。
    pub async fn resolve(
        &self,
        scripts_url: &str,
        source_root: &Path,
        image_label: Option<&str>,
        work_dir: &Path,
        want_save_artifacts: bool,
    ) -> Result<Scripts> {
        let mut origins = Vec::new();
        if !scripts_url.is_empty() {
            origins.push(Origin::parse(scripts_url));
        }
        origins.push(Origin::Dir(source_root.join(SOURCE_SCRIPTS_DIR)));
        origins.push(Origin::parse(
            image_label
                .filter(|l| !l.is_empty())
                .unwrap_or(DEFAULT_SCRIPTS_URL),
        ));

        let upload_dir = work_dir.join(UPLOAD_SCRIPTS_DIR);

        let assemble = self
            .find(&origins, ASSEMBLE, &upload_dir)
            .await?
            .ok_or_else(|| BuildError::ScriptNotFound {
                script: ASSEMBLE.to_string(),
            })?;
        let run = self
            .find(&origins, RUN, &upload_dir)
            .await?
            .ok_or_else(|| BuildError::ScriptNotFound {
                script: RUN.to_string(),
            })?;
        let save_artifacts = if want_save_artifacts {
            self.find(&origins, SAVE_ARTIFACTS, &upload_dir).await?
        } else {
            None
        };

        tracing::debug!(
            assemble = %assemble.container_path(ASSEMBLE),
            run = %run.container_path(RUN),
            "Resolved scripts"
        );
        Ok(Scripts {
            assemble,
            run,
            save_artifacts,
        })
    }

    async fn find(
        &self,
        origins: &[Origin],
        name: &str,
        upload_dir: &Path,
    ) -> Result<Option<ScriptLocation>> {
        for origin in origins {
            let found = match origin {
                Origin::Image(dir) => Some(ScriptLocation::Image(format!(
                    "{}/{}",
                    dir.trim_end_matches('/'),
                    name
                ))),
                Origin::Dir(dir) => {
                    let script = dir.join(name);
                    if script.is_file() {
                        install(&std::fs::read(&script)?, &upload_dir.join(name))?;
                        tracing::debug!("Using {} from {}", name, dir.display());
                        Some(ScriptLocation::Uploaded)
                    } else {
                        None
                    }
                }
                Origin::Http(base) => self.download(base, name, upload_dir).await?,
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    async fn download(
        &self,
        base: &str,
        name: &str,
        upload_dir: &Path,
    ) -> Result<Option<ScriptLocation>> {
        let url = format!("{}/{}", base.trim_end_matches('/'), name);
        tracing::debug!("Downloading {}", url);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to download {}: {}", url, e);
                return Ok(None);
            }
        };
        if !response.status().is_success() {
            tracing::debug!("{} returned {}", url, response.status());
            return Ok(None);
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", url, e);
                return Ok(None);
            }
        };

        install(&body, &upload_dir.join(name))?;
        Ok(Some(ScriptLocation::Uploaded))
    }
}

/// スクリプトを実行可能な状態で配置
fn install(content: &[u8], dest: &Path) -> Result<()> {
    crate::util::write_atomic(dest, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
