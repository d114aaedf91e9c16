use s2irun_core::S2iError;
use std::path::PathBuf;
use thiserror::Error;

/// エラーの分類（ログ出力に使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Validation,
    Source,
    Daemon,
    Strategy,
    ExternalTool,
    Reporting,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Validation => "validation",
            ErrorKind::Source => "source",
            ErrorKind::Daemon => "daemon",
            ErrorKind::Strategy => "strategy",
            ErrorKind::ExternalTool => "external-tool",
            ErrorKind::Reporting => "reporting",
        }
    }

    /// 設定読み込み・ソース解析のエラーの分類
    pub fn from_core(error: &S2iError) -> Self {
        match error {
            S2iError::ConfigNotFound(_)
            | S2iError::ConfigRead { .. }
            | S2iError::ConfigParse { .. }
            | S2iError::InvalidImageName { .. } => ErrorKind::Config,
            S2iError::Validation(_) => ErrorKind::Validation,
            S2iError::InvalidSource { .. } => ErrorKind::Source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Core(#[from] S2iError),

    #[error("git executable not found in PATH")]
    ScmNotFound,

    #[error("failed to clone {url}: {message}")]
    CloneFailed { url: String, message: String },

    #[error("failed to fetch source {url}: {message}")]
    SourceFetch { url: String, message: String },

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Docker daemon is not reachable: {0}")]
    DaemonUnreachable(String),

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("failed to write registry credentials {path}: {source}")]
    CredentialsWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to pull image {image}: {message}")]
    PullFailed { image: String, message: String },

    #[error("image {image} is not available locally and pull policy is 'never'")]
    ImageNotAvailable { image: String },

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("required script '{script}' was not found (checked scriptsUrl, .s2i/bin and the builder image)")]
    ScriptNotFound { script: String },

    #[error("failed to commit image {image}: {message}")]
    CommitFailed { image: String, message: String },

    #[error("failed to write Dockerfile {path}: {source}")]
    DockerfileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("external builder failed: {0}")]
    ExternalTool(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("failed to query registry: {0}")]
    Reporting(String),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Core(core) => ErrorKind::from_core(core),
            BuildError::InvalidConfig(_) => ErrorKind::Config,
            BuildError::ScmNotFound
            | BuildError::CloneFailed { .. }
            | BuildError::SourceFetch { .. } => ErrorKind::Source,
            BuildError::DockerConnection(_) | BuildError::DaemonUnreachable(_) => {
                ErrorKind::Daemon
            }
            BuildError::ExternalTool(_) | BuildError::CredentialsWrite { .. } => {
                ErrorKind::ExternalTool
            }
            BuildError::Reporting(_) => ErrorKind::Reporting,
            BuildError::AuthFailed { .. }
            | BuildError::PullFailed { .. }
            | BuildError::ImageNotAvailable { .. }
            | BuildError::BuildFailed(_)
            | BuildError::ScriptNotFound { .. }
            | BuildError::CommitFailed { .. }
            | BuildError::DockerfileWrite { .. }
            | BuildError::CommandFailed { .. }
            | BuildError::Timeout { .. }
            | BuildError::Io(_) => ErrorKind::Strategy,
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::Core(core) => core.user_message(),
            BuildError::ScmNotFound => "gitが見つかりません\n\
                 \n\
                 解決方法:\n\
                 1. ビルド環境にgitをインストールしてください\n\
                 2. PATHにgitが含まれているか確認してください"
                .to_string(),
            BuildError::DaemonUnreachable(_) | BuildError::DockerConnection(_) => {
                let cause = match self {
                    BuildError::DaemonUnreachable(msg) => msg.clone(),
                    other => other.to_string(),
                };
                format!(
                    "Dockerに接続できません: {}\n\
                     \n\
                     解決方法:\n\
                     • Dockerデーモンが起動しているか確認してください\n\
                     • DOCKER_HOST または dockerConfig.endpoint を確認してください\n\
                     • デーモンを使えない環境では KANIKO_EXEC_PATH を設定してください",
                    cause
                )
            }
            BuildError::ScriptNotFound { script } => format!(
                "{}スクリプトが見つかりません\n\
                 \n\
                 解決方法:\n\
                 • scriptsUrl を設定してください\n\
                 • ソースの .s2i/bin/{} に配置してください\n\
                 • builderイメージの io.openshift.s2i.scripts-url ラベルを確認してください",
                script, script
            ),
            BuildError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました: {}\n\
                     \n\
                     assembleスクリプトの出力を確認してください。",
                    msg
                )
            }
            BuildError::ExternalTool(msg) => {
                format!(
                    "外部ビルダーが失敗しました: {}\n\
                     \n\
                     Dockerfileとpush先レジストリの認証情報を確認してください。",
                    msg
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
