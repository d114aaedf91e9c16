//! Dockerデーモンとのやり取り
//!
//! 接続確認・pullポリシーに従ったイメージ取得・メタデータ取得・
//! イメージビルド・ビルドしたイメージの実行を担当します。

use crate::error::{BuildError, Result};
use crate::progress::BuildProgress;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use colored::Colorize;
use futures_util::stream::StreamExt;
use s2irun_core::{DockerConfig, PullPolicy};
use std::collections::HashMap;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// イメージのメタデータ（inspect結果から必要な項目のみ）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub created: String,
    pub labels: HashMap<String, String>,
    pub on_build: Vec<String>,
    pub user: String,
}

impl ImageMetadata {
    pub fn has_onbuild(&self) -> bool {
        !self.on_build.is_empty()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

impl From<bollard::models::ImageInspect> for ImageMetadata {
    fn from(inspect: bollard::models::ImageInspect) -> Self {
        let config = inspect.config.unwrap_or_default();
        Self {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            size: inspect.size.unwrap_or_default(),
            created: inspect.created.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            on_build: config.on_build.unwrap_or_default(),
            user: config.user.unwrap_or_default(),
        }
    }
}

/// ビルド成功時の情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltImage {
    pub id: String,
    /// ビルドログ（stream出力）の各行
    pub log: Vec<String>,
}

pub struct DockerGateway {
    docker: Docker,
}

impl DockerGateway {
    /// 設定のエンドポイント（空ならDOCKER_HOST・ローカル既定値）に接続
    pub fn connect(config: &DockerConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim();
        let docker = if endpoint.is_empty() {
            Docker::connect_with_local_defaults()?
        } else if endpoint.starts_with("unix://") || endpoint.starts_with('/') {
            Docker::connect_with_socket(
                endpoint,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )?
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(
                endpoint,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )?
        } else {
            return Err(BuildError::InvalidConfig(format!(
                "unsupported Docker endpoint '{}'",
                endpoint
            )));
        };
        tracing::debug!(
            "Docker client created for {}",
            if endpoint.is_empty() {
                "local defaults"
            } else {
                endpoint
            }
        );
        Ok(Self { docker })
    }

    /// デーモンに到達できるか確認
    pub async fn check_reachable(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| BuildError::DaemonUnreachable(e.to_string()))?;
        tracing::debug!("Docker daemon is reachable");
        Ok(())
    }

    /// イメージの存在確認
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }

    /// pullポリシーに従ってイメージを用意する
    ///
    /// 戻り値はイメージがローカルに存在するか（`never` で存在しない場合のみ false）。
    pub async fn ensure_image(
        &self,
        image: &str,
        policy: PullPolicy,
        credentials: Option<DockerCredentials>,
        required: bool,
    ) -> Result<bool> {
        match policy {
            PullPolicy::Always => {
                self.pull(image, credentials).await?;
                Ok(true)
            }
            PullPolicy::IfNotPresent => {
                if self.image_exists(image).await? {
                    tracing::debug!("Image {} found locally", image);
                    return Ok(true);
                }
                self.pull(image, credentials).await?;
                Ok(true)
            }
            PullPolicy::Never => {
                if self.image_exists(image).await? {
                    Ok(true)
                } else if required {
                    Err(BuildError::ImageNotAvailable {
                        image: image.to_string(),
                    })
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// イメージをpull
    pub async fn pull(&self, image: &str, credentials: Option<DockerCredentials>) -> Result<()> {
        let (image_name, tag) = s2irun_core::tag::split_image_tag(image);
        eprintln!("  ↓ Pulling image {}", image.cyan());

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: image_name.as_str(),
            tag: tag.as_str(),
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(info) = stream.next().await {
            match info {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    ..
                }) => {
                    tracing::debug!("pull {}: {}", image, status);
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(BuildError::PullFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image {}", image);
        Ok(())
    }

    /// イメージのメタデータを取得
    pub async fn inspect(&self, image: &str) -> Result<ImageMetadata> {
        let inspect = self.docker.inspect_image(image).await?;
        Ok(ImageMetadata::from(inspect))
    }

    /// tar.gzのビルドコンテキストからイメージをビルド
    pub async fn build_image(
        &self,
        context_data: Vec<u8>,
        dockerfile: &str,
        tag: &str,
        credentials: Option<HashMap<String, DockerCredentials>>,
        timeout: Option<Duration>,
    ) -> Result<BuiltImage> {
        tracing::info!("Building image: {}", tag);

        let progress = BuildProgress::new(tag);
        let build = self.stream_build(context_data, dockerfile, tag, credentials, &progress);

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, build).await {
                Ok(result) => result,
                Err(_) => Err(BuildError::Timeout {
                    operation: "image build".to_string(),
                    seconds: limit.as_secs(),
                }),
            },
            None => build.await,
        };

        match result {
            Ok(mut built) => {
                progress.finish_success();
                if built.id.is_empty() {
                    built.id = self.inspect(tag).await?.id;
                }
                tracing::info!("Successfully built: {} ({})", tag, built.id);
                Ok(built)
            }
            Err(e) => {
                progress.finish_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn stream_build(
        &self,
        context_data: Vec<u8>,
        dockerfile: &str,
        tag: &str,
        credentials: Option<HashMap<String, DockerCredentials>>,
        progress: &BuildProgress,
    ) -> Result<BuiltImage> {
        use bytes::Bytes;
        use http_body_util::{Either, Full};

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile,
            t: tag,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: false,   // pullポリシーは事前に適用済み
            ..Default::default()
        };

        let body = Full::new(Bytes::from(context_data));
        #[allow(deprecated)]
        let mut stream = self
            .docker
            .build_image(options, credentials, Some(Either::Left(body)));

        let mut built = BuiltImage::default();
        while let Some(msg) = stream.next().await {
            let output = msg?;
            Self::handle_build_output(output, progress, &mut built)?;
        }
        Ok(built)
    }

    /// ビルド出力の処理
    fn handle_build_output(
        output: bollard::models::BuildInfo,
        progress: &BuildProgress,
        built: &mut BuiltImage,
    ) -> Result<()> {
        if let Some(stream) = output.stream {
            for line in stream.lines().filter(|l| !l.trim().is_empty()) {
                progress.println(line);
                if line.starts_with("Step ") {
                    progress.set_message(line);
                }
                built.log.push(line.to_string());
            }
        }

        if let Some(error_detail) = output.error_detail {
            let error_msg = error_detail
                .message
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(BuildError::BuildFailed(error_msg));
        }

        #[allow(deprecated)]
        let error = output.error;
        if let Some(error) = error {
            return Err(BuildError::BuildFailed(error));
        }

        if let Some(status) = output.status {
            progress.println(&status.cyan().to_string());
        }

        if let Some(id) = output.aux.and_then(|aux| aux.id) {
            built.id = id;
        }

        Ok(())
    }

    /// ビルドしたイメージを実行し、ログを流して終了コードを返す
    pub async fn run_image(&self, image: &str, name: &str) -> Result<i64> {
        #[allow(deprecated)]
        let config = bollard::container::Config {
            image: Some(image.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        #[allow(deprecated)]
        let options = bollard::container::CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| BuildError::BuildFailed(format!("failed to create container: {}", e)))?;

        let result = self.follow_container(name).await;

        if let Err(e) = self
            .docker
            .remove_container(
                name,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!("Failed to remove container {}: {}", name, e);
        }

        result
    }

    async fn follow_container(&self, name: &str) -> Result<i64> {
        self.docker
            .start_container(name, None::<bollard::query_parameters::StartContainerOptions>)
            .await?;
        tracing::info!("Running container {}", name);

        let options = bollard::query_parameters::LogsOptions {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let mut logs = self.docker.logs(name, Some(options));
        while let Some(log_result) = logs.next().await {
            match log_result {
                Ok(log) => print!("{}", log),
                Err(e) => {
                    tracing::warn!("Log stream for {} ended: {}", name, e);
                    break;
                }
            }
        }

        let mut wait = self
            .docker
            .wait_container(name, None::<bollard::query_parameters::WaitContainerOptions>);
        let code = match wait.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(BuildError::DockerConnection(e)),
            None => 0,
        };
        tracing::info!("Container {} exited with {}", name, code);
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_inspect() {
        let inspect = bollard::models::ImageInspect {
            id: Some("sha256:abc".to_string()),
            repo_tags: Some(vec!["alice/app:latest".to_string()]),
            size: Some(1024),
            ..Default::default()
        };

        let metadata = ImageMetadata::from(inspect);
        assert_eq!(metadata.id, "sha256:abc");
        assert_eq!(metadata.size, 1024);
        assert!(!metadata.has_onbuild());
        assert!(metadata.label("io.openshift.s2i.scripts-url").is_none());
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let config = DockerConfig {
            endpoint: "ftp://docker".to_string(),
        };
        assert!(matches!(
            DockerGateway::connect(&config),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_build_output_error_detail() {
        let progress = BuildProgress::new("test");
        let mut built = BuiltImage::default();
        let output = bollard::models::BuildInfo {
            stream: Some("Step 1/2 : FROM alpine\n".to_string()),
            error_detail: Some(bollard::models::ErrorDetail {
                code: Some(1),
                message: Some("assemble failed".to_string()),
            }),
            ..Default::default()
        };

        let err = DockerGateway::handle_build_output(output, &progress, &mut built).unwrap_err();
        assert!(matches!(err, BuildError::BuildFailed(ref m) if m == "assemble failed"));
        assert_eq!(built.log, vec!["Step 1/2 : FROM alpine"]);
    }

    #[test]
    fn test_build_output_captures_image_id() {
        let progress = BuildProgress::new("test");
        let mut built = BuiltImage::default();
        let output = bollard::models::BuildInfo {
            aux: Some(bollard::models::ImageId {
                id: Some("sha256:feed".to_string()),
            }),
            ..Default::default()
        };

        DockerGateway::handle_build_output(output, &progress, &mut built).unwrap();
        assert_eq!(built.id, "sha256:feed");
    }

    #[tokio::test]
    #[ignore] // Docker接続が必要なため、通常のテストではスキップ
    async fn test_build_simple_image() {
        use crate::context::ContextBuilder;
        use std::fs;
        use tempfile::tempdir;

        let gateway = DockerGateway::connect(&DockerConfig::default()).unwrap();
        gateway.check_reachable().await.unwrap();

        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("Dockerfile"),
            "FROM alpine:latest\nCMD echo 'test'",
        )
        .unwrap();
        gateway
            .ensure_image("alpine:latest", PullPolicy::IfNotPresent, None, true)
            .await
            .unwrap();

        let context_data = ContextBuilder::create_context(temp_dir.path(), "Dockerfile").unwrap();
        let built = gateway
            .build_image(context_data, "Dockerfile", "s2irun-test:latest", None, None)
            .await
            .unwrap();
        assert!(!built.id.is_empty());

        let code = gateway
            .run_image("s2irun-test:latest", "s2irun-test-run")
            .await
            .unwrap();
        assert_eq!(code, 0);

        gateway
            .docker
            .remove_image(
                "s2irun-test:latest",
                None::<bollard::query_parameters::RemoveImageOptions>,
                None,
            )
            .await
            .ok();
    }
}
