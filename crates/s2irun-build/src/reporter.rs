//! ビルド結果の報告
//!
//! push先レジストリ（Harbor API）からタグのメタデータを取得し、
//! 結果レコードを結果シンクに渡します。ここでの失敗はビルドを失敗させません。

use crate::docker::ImageMetadata;
use crate::error::{BuildError, Result};
use crate::util::write_atomic;
use s2irun_core::{AuthConfig, ImageReference};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 結果レコードの出力先を指定する環境変数
pub const RESULT_PATH_ENV_VARIABLE: &str = "S2I_RESULT_PATH";
pub const DEFAULT_RESULT_PATH: &str = "/dev/termination-log";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// レジストリ上のタグ情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub digest: String,
}

/// 結果レコード
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResultInfo {
    pub image_name: String,
    pub image_repo_tags: Vec<String>,
    pub image_size: i64,
    #[serde(rename = "imageID")]
    pub image_id: String,
    pub image_created: String,
}

impl OutputResultInfo {
    /// rootlessビルドでpushしたイメージの結果
    ///
    /// イメージ名はレジストリとタグを除いたリポジトリ名、タグは `image_repo_tags` に入る。
    pub fn from_tag_info(reference: &ImageReference, info: TagInfo) -> Self {
        Self {
            image_name: reference.repository.clone(),
            image_repo_tags: vec![reference.tag.clone()],
            image_size: info.size,
            image_id: info.digest,
            image_created: info.created,
        }
    }

    /// デーモンでビルドしたイメージの結果
    pub fn from_image(image_name: &str, metadata: &ImageMetadata) -> Self {
        Self {
            image_name: image_name.to_string(),
            image_repo_tags: metadata.repo_tags.clone(),
            image_size: metadata.size,
            image_id: metadata.id.clone(),
            image_created: metadata.created.clone(),
        }
    }
}

/// 結果レコードの受け取り先
pub trait ResultSink: Send + Sync {
    fn record(&self, info: &OutputResultInfo) -> Result<()>;
}

/// JSONをファイルに書き出すシンク
#[derive(Debug, Clone)]
pub struct FileResultSink {
    path: PathBuf,
}

impl FileResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// S2I_RESULT_PATH、未設定なら /dev/termination-log
    pub fn from_env() -> Self {
        let path = std::env::var(RESULT_PATH_ENV_VARIABLE)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_RESULT_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ResultSink for FileResultSink {
    fn record(&self, info: &OutputResultInfo) -> Result<()> {
        let content =
            serde_json::to_vec(info).map_err(|e| BuildError::Reporting(e.to_string()))?;

        // /dev/termination-log のようにrenameできないファイルは直接書き込む
        if let Err(e) = write_atomic(&self.path, &content) {
            tracing::debug!(
                "Atomic write to {} failed ({}), writing in place",
                self.path.display(),
                e
            );
            std::fs::write(&self.path, &content).map_err(|e| {
                BuildError::Reporting(format!("failed to write {}: {}", self.path.display(), e))
            })?;
        }
        tracing::debug!("Result recorded to {}", self.path.display());
        Ok(())
    }
}

/// 結果を記録し、失敗はログに残すだけにする
pub fn record_result(sink: &dyn ResultSink, info: &OutputResultInfo) {
    if let Err(e) = sink.record(info) {
        tracing::warn!("Failed to record build result: {}", e);
    }
}

/// Harbor互換のレジストリAPIクライアント
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl RegistryClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BuildError::Reporting(e.to_string()))?;
        Ok(Self {
            http,
            base_url: None,
        })
    }

    /// `https://<server>` の代わりに使うURL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn endpoint(&self, auth: &AuthConfig, image: &str, tag: &str) -> String {
        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", auth.registry_host()),
        };
        format!("{}/api/repositories/{}/tags/{}", base, image, tag)
    }

    /// タグ情報を取得（失敗時はログを出して既定値を返す）
    pub async fn get_tag_info(&self, image: &str, tag: &str, auth: &AuthConfig) -> TagInfo {
        match self.fetch_tag_info(image, tag, auth).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Could not get tag info for {}:{}: {}", image, tag, e);
                TagInfo::default()
            }
        }
    }

    async fn fetch_tag_info(&self, image: &str, tag: &str, auth: &AuthConfig) -> Result<TagInfo> {
        let url = self.endpoint(auth, image, tag);
        tracing::debug!("GET {}", url);

        let mut request = self.http.get(&url);
        if !auth.is_empty() {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| BuildError::Reporting(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BuildError::Reporting(format!(
                "registry returned {}",
                response.status()
            )));
        }
        response
            .json::<TagInfo>()
            .await
            .map_err(|e| BuildError::Reporting(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// 記録内容をメモリに保持するシンク
    #[derive(Default)]
    pub struct MemorySink {
        pub records: Mutex<Vec<OutputResultInfo>>,
        pub fail: bool,
    }

    impl ResultSink for MemorySink {
        fn record(&self, info: &OutputResultInfo) -> Result<()> {
            if self.fail {
                return Err(BuildError::Reporting("sink unavailable".to_string()));
            }
            self.records.lock().unwrap().push(info.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tempfile::tempdir;

    fn auth() -> AuthConfig {
        AuthConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
            server_address: "harbor.example.com".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_tag_info() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/repositories/alice/app/tags/v1")
            .match_header("authorization", Matcher::Exact("Basic YWxpY2U6c2VjcmV0".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"name":"v1","digest":"sha256:abc","size":2048,"created":"2024-05-01T00:00:00Z"}"#,
            )
            .create_async()
            .await;

        let client = RegistryClient::new().unwrap().with_base_url(server.url());
        let info = client.get_tag_info("alice/app", "v1", &auth()).await;

        mock.assert_async().await;
        assert_eq!(
            info,
            TagInfo {
                created: "2024-05-01T00:00:00Z".to_string(),
                size: 2048,
                digest: "sha256:abc".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_get_tag_info_http_error_yields_default() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/repositories/alice/app/tags/v1")
            .with_status(401)
            .create_async()
            .await;

        let client = RegistryClient::new().unwrap().with_base_url(server.url());
        let info = client.get_tag_info("alice/app", "v1", &auth()).await;
        assert_eq!(info, TagInfo::default());
    }

    #[tokio::test]
    async fn test_get_tag_info_bad_body_yields_default() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/repositories/alice/app/tags/v1")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let client = RegistryClient::new().unwrap().with_base_url(server.url());
        let info = client.get_tag_info("alice/app", "v1", &auth()).await;
        assert_eq!(info, TagInfo::default());
    }

    #[tokio::test]
    async fn test_get_tag_info_unreachable_yields_default() {
        let client = RegistryClient::new()
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let info = client.get_tag_info("alice/app", "v1", &auth()).await;
        assert_eq!(info, TagInfo::default());
    }

    #[test]
    fn test_endpoint_uses_registry_host() {
        let client = RegistryClient::new().unwrap();
        let mut auth = auth();
        auth.server_address = "https://harbor.example.com/".to_string();
        assert_eq!(
            client.endpoint(&auth, "alice/app", "v1"),
            "https://harbor.example.com/api/repositories/alice/app/tags/v1"
        );
    }

    #[test]
    fn test_output_from_tag_info() {
        let reference = ImageReference::parse("alice/app:v1", "harbor.example.com").unwrap();
        let info = OutputResultInfo::from_tag_info(
            &reference,
            TagInfo {
                created: "2024".to_string(),
                size: 10,
                digest: "sha256:abc".to_string(),
            },
        );
        assert_eq!(info.image_name, "alice/app");
        assert_eq!(info.image_repo_tags, vec!["v1"]);
        assert_eq!(info.image_id, "sha256:abc");
    }

    #[test]
    fn test_file_sink_writes_json() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("result.json");
        let sink = FileResultSink::new(&path);
        let info = OutputResultInfo {
            image_name: "alice/app:v1".to_string(),
            image_id: "sha256:abc".to_string(),
            ..Default::default()
        };

        sink.record(&info).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["imageName"], "alice/app:v1");
        assert_eq!(written["imageID"], "sha256:abc");
        assert_eq!(written["imageRepoTags"], serde_json::json!([]));
    }

    #[test]
    fn test_file_sink_from_env() {
        temp_env::with_var(RESULT_PATH_ENV_VARIABLE, Some("/tmp/s2i-result"), || {
            assert_eq!(
                FileResultSink::from_env().path(),
                std::path::Path::new("/tmp/s2i-result")
            );
        });
        temp_env::with_var(RESULT_PATH_ENV_VARIABLE, None::<&str>, || {
            assert_eq!(
                FileResultSink::from_env().path(),
                std::path::Path::new(DEFAULT_RESULT_PATH)
            );
        });
    }

    #[test]
    fn test_record_result_swallows_errors() {
        let sink = fake::MemorySink {
            fail: true,
            ..Default::default()
        };
        record_result(&sink, &OutputResultInfo::default());
        assert!(sink.records.lock().unwrap().is_empty());
    }
}
