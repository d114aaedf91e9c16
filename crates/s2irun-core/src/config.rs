//! ビルド設定モデル
//!
//! JSON設定ファイル（S2I_CONFIG_PATH）を `BuildConfig` にデシリアライズします。
//! キー名はcamelCaseです。

use crate::error::{Result, S2iError};
use crate::source::SourceDescriptor;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument};

/// 設定ファイルのパスを指定する環境変数
pub const CONFIG_ENV_VARIABLE: &str = "S2I_CONFIG_PATH";

/// rootlessビルダー（kaniko互換）の実行ファイルパスを指定する環境変数
pub const KANIKO_ENV_VARIABLE: &str = "KANIKO_EXEC_PATH";

/// イメージのpullポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

pub const DEFAULT_BUILDER_PULL_POLICY: PullPolicy = PullPolicy::IfNotPresent;
pub const DEFAULT_PREVIOUS_IMAGE_PULL_POLICY: PullPolicy = PullPolicy::IfNotPresent;
pub const DEFAULT_RUNTIME_IMAGE_PULL_POLICY: PullPolicy = PullPolicy::IfNotPresent;

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "always",
            PullPolicy::IfNotPresent => "if-not-present",
            PullPolicy::Never => "never",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "always" => Ok(PullPolicy::Always),
            "if-not-present" => Ok(PullPolicy::IfNotPresent),
            "never" => Ok(PullPolicy::Never),
            other => Err(format!(
                "invalid pull policy '{}' (expected one of: always, if-not-present, never)",
                other
            )),
        }
    }
}

/// 空文字列を未設定として扱う
fn empty_policy_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<PullPolicy>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// レジストリ認証情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "serveraddress")]
    pub server_address: String,
}

impl AuthConfig {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    /// スキームと末尾のスラッシュを除いたレジストリホスト
    pub fn registry_host(&self) -> &str {
        let host = self
            .server_address
            .strip_prefix("https://")
            .or_else(|| self.server_address.strip_prefix("http://"))
            .unwrap_or(&self.server_address);
        host.trim_end_matches('/')
    }
}

/// Dockerデーモンへの接続設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    /// unix:///var/run/docker.sock, tcp://host:2375 など。空の場合はDOCKER_HOSTまたはローカル既定値
    #[serde(default)]
    pub endpoint: String,
}

/// ビルド時の環境変数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// runtimeイメージへコピーする成果物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// builderイメージ内のパス
    pub source: String,
    /// runtimeイメージ内のコピー先（WORKDIRからの相対パス）
    #[serde(default)]
    pub destination: String,
}

/// ビルド設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(rename = "sourceURL", default)]
    pub source_url: String,

    #[serde(rename = "isBinaryURL", default)]
    pub is_binary_url: bool,

    /// `source_url` から解決されたソース記述子
    #[serde(skip)]
    pub source: Option<SourceDescriptor>,

    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub builder_image: String,

    #[serde(default)]
    pub runtime_image: String,

    #[serde(default)]
    pub runtime_artifacts: Vec<VolumeSpec>,

    /// 設定されている場合はDockerfileの生成のみを行う
    #[serde(default)]
    pub as_dockerfile: String,

    #[serde(default)]
    pub run_image: bool,

    #[serde(default)]
    pub incremental: bool,

    #[serde(default, deserialize_with = "empty_policy_as_none")]
    pub builder_pull_policy: Option<PullPolicy>,

    #[serde(default, deserialize_with = "empty_policy_as_none")]
    pub previous_image_pull_policy: Option<PullPolicy>,

    #[serde(default, deserialize_with = "empty_policy_as_none")]
    pub runtime_image_pull_policy: Option<PullPolicy>,

    #[serde(default)]
    pub push_authentication: AuthConfig,

    #[serde(default)]
    pub pull_authentication: AuthConfig,

    /// rootlessビルドでのclone先
    #[serde(default)]
    pub context_dir: PathBuf,

    /// デーモンビルドの作業ディレクトリ（未指定時は一時ディレクトリ）
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// assemble/runスクリプトの取得元URL（最優先）
    #[serde(default)]
    pub scripts_url: String,

    #[serde(default)]
    pub environment: Vec<EnvironmentSpec>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub docker_config: DockerConfig,

    /// イメージビルド・外部ビルダーのタイムアウト（秒）
    #[serde(default)]
    pub build_timeout_seconds: Option<u64>,
}

impl BuildConfig {
    /// 設定ファイルを読み込む
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(S2iError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| S2iError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: BuildConfig =
            serde_json::from_str(&content).map_err(|source| S2iError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(
            builder_image = %config.builder_image,
            tag = %config.tag,
            "Config loaded"
        );
        Ok(config)
    }

    /// 解決済みのソース記述子
    pub fn source(&self) -> Result<&SourceDescriptor> {
        self.source.as_ref().ok_or_else(|| S2iError::InvalidSource {
            url: self.source_url.clone(),
            reason: "source has not been resolved".to_string(),
        })
    }

    pub fn builder_pull_policy(&self) -> PullPolicy {
        self.builder_pull_policy
            .unwrap_or(DEFAULT_BUILDER_PULL_POLICY)
    }

    pub fn previous_image_pull_policy(&self) -> PullPolicy {
        self.previous_image_pull_policy
            .unwrap_or(DEFAULT_PREVIOUS_IMAGE_PULL_POLICY)
    }

    pub fn runtime_image_pull_policy(&self) -> PullPolicy {
        self.runtime_image_pull_policy
            .unwrap_or(DEFAULT_RUNTIME_IMAGE_PULL_POLICY)
    }

    /// ログ出力用の設定サマリ（パスワードは出力しない）
    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("Builder Image:\t\t{}", self.builder_image),
            format!("Source:\t\t\t{}", self.source_url),
            format!("Output Image Tag:\t{}", self.tag),
            format!("Incremental Build:\t{}", self.incremental),
            format!("Builder Pull Policy:\t{}", self.builder_pull_policy()),
            format!(
                "Previous Image Pull Policy:\t{}",
                self.previous_image_pull_policy()
            ),
        ];
        if !self.runtime_image.is_empty() {
            lines.push(format!("Runtime Image:\t\t{}", self.runtime_image));
            lines.push(format!(
                "Runtime Image Pull Policy:\t{}",
                self.runtime_image_pull_policy()
            ));
        }
        if !self.as_dockerfile.is_empty() {
            lines.push(format!("As Dockerfile:\t\t{}", self.as_dockerfile));
        }
        if !self.push_authentication.server_address.is_empty() {
            lines.push(format!(
                "Push Registry:\t\t{} (user: {})",
                self.push_authentication.server_address, self.push_authentication.username
            ));
        }
        for env in &self.environment {
            lines.push(format!("Environment:\t\t{}=***", env.name));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_deserialize_full_config() {
        let json = r#"{
            "sourceURL": "https://github.com/org/app.git#main",
            "isBinaryURL": false,
            "tag": "app:${COMMIT}",
            "builderImage": "builder/nodejs:18",
            "builderPullPolicy": "always",
            "pushAuthentication": {
                "username": "alice",
                "password": "secret",
                "serverAddress": "registry.example.com"
            },
            "contextDir": "/workspace/src",
            "labels": {"team": "platform"},
            "environment": [{"name": "NODE_ENV", "value": "production"}]
        }"#;

        let config: BuildConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.source_url, "https://github.com/org/app.git#main");
        assert_eq!(config.builder_pull_policy, Some(PullPolicy::Always));
        assert_eq!(config.previous_image_pull_policy, None);
        assert_eq!(config.push_authentication.username, "alice");
        assert_eq!(config.context_dir, PathBuf::from("/workspace/src"));
        assert_eq!(config.labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(config.environment[0].name, "NODE_ENV");
        assert!(config.source.is_none());
    }

    #[test]
    fn test_empty_pull_policy_is_unset() {
        let config: BuildConfig =
            serde_json::from_str(r#"{"builderPullPolicy": "", "runtimeImagePullPolicy": null}"#)
                .unwrap();
        assert_eq!(config.builder_pull_policy, None);
        assert_eq!(config.runtime_image_pull_policy, None);
    }

    #[test]
    fn test_unknown_pull_policy_rejected() {
        let err = serde_json::from_str::<BuildConfig>(r#"{"builderPullPolicy": "sometimes"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("if-not-present"));
    }

    #[test]
    fn test_legacy_serveraddress_alias() {
        let auth: AuthConfig =
            serde_json::from_str(r#"{"username": "u", "serveraddress": "https://reg.local/"}"#)
                .unwrap();
        assert_eq!(auth.server_address, "https://reg.local/");
        assert_eq!(auth.registry_host(), "reg.local");
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("missing.json");

        let err = BuildConfig::load(&path).unwrap_err();
        assert!(matches!(err, S2iError::ConfigNotFound(p) if p == path));
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = BuildConfig::load(&path).unwrap_err();
        assert!(matches!(err, S2iError::ConfigParse { .. }));
    }

    #[test]
    fn test_load_valid_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"sourceURL": "./src", "builderImage": "builder", "tag": "app"}"#,
        )
        .unwrap();

        let config = BuildConfig::load(&path).unwrap();
        assert_eq!(config.builder_image, "builder");
        assert_eq!(config.builder_pull_policy(), DEFAULT_BUILDER_PULL_POLICY);
    }

    #[test]
    fn test_describe_hides_password() {
        let config = BuildConfig {
            builder_image: "builder".to_string(),
            push_authentication: AuthConfig {
                username: "alice".to_string(),
                password: "hunter2".to_string(),
                server_address: "reg.local".to_string(),
                ..Default::default()
            },
            environment: vec![EnvironmentSpec {
                name: "TOKEN".to_string(),
                value: "abc".to_string(),
            }],
            ..Default::default()
        };

        let description = config.describe();
        assert!(description.contains("reg.local"));
        assert!(!description.contains("hunter2"));
        assert!(!description.contains("abc"));
    }
}
