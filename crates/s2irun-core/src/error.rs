use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum S2iError {
    #[error("config file does not exist: {0}")]
    ConfigNotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("invalid source '{url}': {reason}")]
    InvalidSource { url: String, reason: String },

    #[error("invalid image name '{name}': {reason}")]
    InvalidImageName { name: String, reason: String },
}

impl S2iError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            S2iError::ConfigNotFound(path) => {
                format!(
                    "設定ファイルが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. S2I_CONFIG_PATH 環境変数のパスを確認してください\n\
                     2. --config オプションで明示的に指定してください",
                    path.display()
                )
            }
            S2iError::ConfigParse { path, source } => {
                format!(
                    "設定ファイルにエラーがあります: {}\n\
                     {}\n\
                     \n\
                     JSONの構文とフィールド名を確認してください。",
                    path.display(),
                    source
                )
            }
            S2iError::InvalidSource { url, reason } => {
                format!(
                    "sourceURL が不正です: {}\n理由: {}\n\
                     \n\
                     URL、ローカルパス、または user@host:path 形式で指定してください。",
                    url, reason
                )
            }
            _ => format!("{}", self),
        }
    }
}

/// 設定検証で検出された個々のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    RunWithDockerfile,
    RuntimeImageWithDockerfile,
    IncrementalWithRuntimeImage,
    Required(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::RunWithDockerfile => {
                write!(f, "--run cannot be used with --as-dockerfile")
            }
            ValidationError::RuntimeImageWithDockerfile => {
                write!(f, "--runtime-image cannot be used with --as-dockerfile")
            }
            ValidationError::IncrementalWithRuntimeImage => {
                write!(f, "incremental build with runtime image isn't supported")
            }
            ValidationError::Required(field) => write!(f, "{} is required", field),
        }
    }
}

/// 検証エラーの集約（fail-fastではなく全件を保持）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "ERROR: {}", e)?;
        }
        Ok(())
    }
}

impl From<ValidationErrors> for S2iError {
    fn from(errors: ValidationErrors) -> Self {
        S2iError::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, S2iError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display_one_per_line() {
        let errors = ValidationErrors(vec![
            ValidationError::RunWithDockerfile,
            ValidationError::Required("builderImage"),
        ]);
        assert_eq!(
            errors.to_string(),
            "ERROR: --run cannot be used with --as-dockerfile\nERROR: builderImage is required"
        );
    }

    #[test]
    fn test_user_message_falls_back_to_display() {
        let err = S2iError::InvalidImageName {
            name: "UPPER".to_string(),
            reason: "uppercase".to_string(),
        };
        assert_eq!(err.user_message(), err.to_string());
    }
}
