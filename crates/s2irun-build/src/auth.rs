//! レジストリ認証処理
//!
//! - pull: 設定の `pullAuthentication`、なければ Docker config.json から
//!   Bollard の DockerCredentials を組み立てます。
//! - push（rootless）: kaniko が読む config.json を生成します。

use crate::error::{BuildError, Result};
use crate::util::write_atomic;
use base64::Engine;
use bollard::auth::DockerCredentials;
use s2irun_core::AuthConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// kaniko が認証情報を読むディレクトリの既定値
pub const DEFAULT_KANIKO_DOCKER_CONFIG_DIR: &str = "/kaniko/.docker";

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_INDEX: &str = "https://index.docker.io/v1/";

/// Docker config.json の構造
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creds_store: Option<String>,
}

/// 認証エントリ
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// "user:password" をBase64エンコード
pub fn encode_basic_auth(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password))
}

/// 設定の認証情報をBollardの形式に変換（空ならNone）
pub fn to_docker_credentials(auth: &AuthConfig) -> Option<DockerCredentials> {
    if auth.is_empty() {
        return None;
    }
    Some(DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        email: Some(auth.email.clone()).filter(|e| !e.is_empty()),
        serveraddress: Some(auth.server_address.clone()).filter(|s| !s.is_empty()),
        ..Default::default()
    })
}

/// kaniko 用の認証情報ディレクトリ（DOCKER_CONFIG、未設定なら /kaniko/.docker）
pub fn kaniko_docker_config_dir() -> PathBuf {
    std::env::var("DOCKER_CONFIG")
        .ok()
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_KANIKO_DOCKER_CONFIG_DIR))
}

/// push先の認証情報を `<dir>/config.json` に書き込む
///
/// 生成される内容: `{"auths": {"<server>": {"auth": base64("user:password")}}}`
pub fn write_docker_config(dir: &Path, auth: &AuthConfig) -> Result<PathBuf> {
    let path = dir.join("config.json");

    let mut config = DockerConfigFile::default();
    config.auths.insert(
        auth.registry_host().to_string(),
        AuthEntry {
            auth: Some(encode_basic_auth(&auth.username, &auth.password)),
        },
    );

    let content = serde_json::to_vec_pretty(&config).map_err(|e| BuildError::CredentialsWrite {
        path: path.clone(),
        source: std::io::Error::other(e),
    })?;
    write_atomic(&path, &content).map_err(|source| BuildError::CredentialsWrite {
        path: path.clone(),
        source,
    })?;

    tracing::debug!(
        "Wrote registry credentials for {} to {}",
        auth.registry_host(),
        path.display()
    );
    Ok(path)
}

/// レジストリ認証を管理
#[derive(Debug)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// 新しい RegistryAuth を作成
    ///
    /// デフォルトで ~/.docker/config.json を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    /// 指定したパスの config.json を使用
    #[cfg(test)]
    pub(crate) fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// pull時の認証情報
    ///
    /// 設定に認証情報があればそれを優先し、なければ config.json を参照します。
    pub fn pull_credentials(
        &self,
        image: &str,
        configured: &AuthConfig,
    ) -> Result<Option<DockerCredentials>> {
        if let Some(creds) = to_docker_credentials(configured) {
            return Ok(Some(creds));
        }
        self.get_credentials(image)
    }

    /// イメージ名からレジストリの認証情報を取得
    ///
    /// # Returns
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 認証情報が不要または見つからない場合
    /// * `Err(e)` - config.json が壊れている場合
    pub fn get_credentials(&self, image: &str) -> Result<Option<DockerCredentials>> {
        let registry = extract_registry(image);

        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        let candidates: &[&str] = if registry == DOCKER_HUB {
            &[DOCKER_HUB, DOCKER_HUB_INDEX]
        } else {
            &[registry.as_str()]
        };
        for key in candidates {
            if let Some(auth_entry) = config.auths.get(*key)
                && let Some(auth_b64) = &auth_entry.auth
                && let Some(creds) = decode_auth(auth_b64, &registry)?
            {
                tracing::debug!("Found credentials in auths for {}", registry);
                return Ok(Some(creds));
            }
        }

        if let Some(helper) = &config.creds_store {
            tracing::debug!("Trying credential helper: {}", helper);
            if let Ok(Some(creds)) = get_from_helper(helper, &registry) {
                return Ok(Some(creds));
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    fn load_docker_config(&self) -> Result<DockerConfigFile> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| BuildError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }
}

/// イメージ名からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first.to_string()
        }
        _ => DOCKER_HUB.to_string(),
    }
}

fn decode_auth(auth_b64: &str, registry: &str) -> Result<Option<DockerCredentials>> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;

    let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
        registry: registry.to_string(),
        message: format!("Invalid UTF-8 in auth: {}", e),
    })?;

    Ok(auth_str
        .split_once(':')
        .map(|(username, password)| DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }))
}

/// credential helper の標準入力にレジストリ名を渡す
fn send_registry(stdin: &mut impl Write, registry: &str) -> Result<()> {
    stdin
        .write_all(registry.as_bytes())
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to write to credential helper: {}", e),
        })
}

/// credential helper から認証情報を取得
fn get_from_helper(helper: &str, registry: &str) -> Result<Option<DockerCredentials>> {
    let helper_cmd = format!("docker-credential-{}", helper);

    let mut child = Command::new(&helper_cmd)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to run {}: {}", helper_cmd, e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        send_registry(&mut stdin, registry)?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Credential helper failed: {}", e),
        })?;

    if !output.status.success() {
        tracing::debug!(
            "Credential helper returned error for {}: {}",
            registry,
            String::from_utf8_lossy(&output.stderr)
        );
        return Ok(None);
    }

    let response: CredentialResponse =
        serde_json::from_slice(&output.stdout).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to parse credential helper response: {}", e),
        })?;

    Ok(Some(DockerCredentials {
        username: Some(response.username),
        password: Some(response.secret),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    }))
}

/// 認証情報のマップ（ビルド時のFROMイメージ用）
pub fn credentials_map(creds: Option<DockerCredentials>) -> Option<HashMap<String, DockerCredentials>> {
    let creds = creds?;
    let server = creds
        .serveraddress
        .clone()
        .unwrap_or_else(|| DOCKER_HUB_INDEX.to_string());
    Some(HashMap::from([(server, creds)]))
}
