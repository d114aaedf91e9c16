//! ソースロケーターの解析
//!
//! `sourceURL` を構造化された `SourceDescriptor` に変換します。
//!
//! 受け付ける形式:
//! - スキーム付きURL: `https://github.com/org/app.git`, `git://`, `ssh://`, `file://`
//! - SCP形式: `git@github.com:org/app.git`
//! - ローカルパス: `/src/app`, `./app`, `app`
//!
//! `#ref` でブランチ・タグ・コミットを、`#ref:subdir` でリポジトリ内の
//! コンテキストディレクトリを指定できます。

use crate::error::{Result, S2iError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// ロケーターの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocatorKind {
    /// スキーム付きのリモートURL
    Remote,
    /// `user@host:path` 形式
    Scp,
    /// ローカルファイルシステム上のパス
    Local,
}

/// 解析済みのソース記述子（生成後は不変）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    url: String,
    reference: Option<String>,
    context_dir: Option<String>,
    is_binary: bool,
    kind: LocatorKind,
}

impl SourceDescriptor {
    /// fragmentを除いたロケーター（git clone にそのまま渡せる形）
    pub fn url(&self) -> &str {
        &self.url
    }

    /// チェックアウトするref
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// リポジトリ内のコンテキストディレクトリ
    pub fn context_dir(&self) -> Option<&str> {
        self.context_dir.as_deref()
    }

    pub fn is_binary(&self) -> bool {
        self.is_binary
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    /// ローカルパスの場合はファイルシステム上のパス
    pub fn local_path(&self) -> Option<PathBuf> {
        if self.kind != LocatorKind::Local {
            return None;
        }
        match self.url.strip_prefix("file://") {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(&self.url)),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        match (&self.reference, &self.context_dir) {
            (Some(r), Some(c)) => write!(f, "#{}:{}", r, c),
            (Some(r), None) => write!(f, "#{}", r),
            (None, Some(c)) => write!(f, "#:{}", c),
            (None, None) => Ok(()),
        }
    }
}

/// ソースロケーターを解析
pub fn parse(raw: &str, is_binary: bool) -> Result<SourceDescriptor> {
    let invalid = |reason: &str| S2iError::InvalidSource {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("source locator is empty"));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("source locator contains whitespace"));
    }

    let (base, fragment) = match trimmed.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (trimmed, None),
    };
    if base.is_empty() {
        return Err(invalid("source locator has no location before '#'"));
    }

    let (reference, context_dir) = match fragment {
        None => (None, None),
        Some("") => return Err(invalid("empty '#' fragment")),
        Some(fragment) => {
            let (reference, context_dir) = match fragment.split_once(':') {
                Some((r, c)) => (r, Some(c)),
                None => (fragment, None),
            };
            let context_dir = context_dir
                .map(|c| c.trim_matches('/'))
                .filter(|c| !c.is_empty());
            if let Some(dir) = context_dir
                && dir.split('/').any(|segment| segment == "..")
            {
                return Err(invalid("context directory must stay inside the repository"));
            }
            (
                Some(reference).filter(|r| !r.is_empty()).map(str::to_string),
                context_dir.map(str::to_string),
            )
        }
    };

    let kind = classify(base).map_err(|reason| invalid(&reason))?;

    if is_binary && kind == LocatorKind::Scp {
        return Err(invalid("binary sources must be an archive URL or a local path"));
    }
    if is_binary && kind == LocatorKind::Remote && !base.starts_with("http") {
        return Err(invalid("binary sources must be fetched over http(s)"));
    }

    Ok(SourceDescriptor {
        url: base.to_string(),
        reference,
        context_dir,
        is_binary,
        kind,
    })
}

fn classify(base: &str) -> std::result::Result<LocatorKind, String> {
    if base.contains("://") {
        let url = Url::parse(base).map_err(|e| format!("malformed URL: {}", e))?;
        return match url.scheme() {
            "http" | "https" | "git" | "ssh" | "git+ssh" => {
                if url.host_str().is_none_or(str::is_empty) {
                    Err("URL has no host".to_string())
                } else {
                    Ok(LocatorKind::Remote)
                }
            }
            "file" => Ok(LocatorKind::Local),
            other => Err(format!("unsupported URL scheme '{}'", other)),
        };
    }

    if is_scp_like(base) {
        return Ok(LocatorKind::Scp);
    }

    Ok(LocatorKind::Local)
}

/// `[user@]host:path` 形式かどうか
fn is_scp_like(base: &str) -> bool {
    let Some((host_part, path)) = base.split_once(':') else {
        return false;
    };
    if host_part.contains('/') || path.is_empty() {
        return false;
    }
    let host = match host_part.rsplit_once('@') {
        Some((user, host)) => {
            if user.is_empty() {
                return false;
            }
            host
        }
        None => host_part,
    };
    // Windowsのドライブレター (C:\...) はローカルパス扱い
    !host.is_empty() && host.len() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_url() {
        let source = parse("https://github.com/org/app.git", false).unwrap();
        assert_eq!(source.url(), "https://github.com/org/app.git");
        assert_eq!(source.kind(), LocatorKind::Remote);
        assert_eq!(source.reference(), None);
        assert_eq!(source.context_dir(), None);
        assert!(!source.is_binary());
    }

    #[test]
    fn test_parse_ref_and_context_dir() {
        let source = parse("https://github.com/org/app.git#v1.2.0:services/api/", false).unwrap();
        assert_eq!(source.url(), "https://github.com/org/app.git");
        assert_eq!(source.reference(), Some("v1.2.0"));
        assert_eq!(source.context_dir(), Some("services/api"));
        assert_eq!(
            source.to_string(),
            "https://github.com/org/app.git#v1.2.0:services/api"
        );
    }

    #[test]
    fn test_parse_scp_style() {
        let source = parse("git@github.com:org/app.git#main", false).unwrap();
        assert_eq!(source.kind(), LocatorKind::Scp);
        assert_eq!(source.url(), "git@github.com:org/app.git");
        assert_eq!(source.reference(), Some("main"));
    }

    #[test]
    fn test_parse_local_paths() {
        for raw in ["/src/app", "./app", "../app", "source1"] {
            let source = parse(raw, false).unwrap();
            assert_eq!(source.kind(), LocatorKind::Local, "{}", raw);
            assert_eq!(source.local_path(), Some(PathBuf::from(raw)));
        }

        let source = parse("file:///src/app", false).unwrap();
        assert_eq!(source.local_path(), Some(PathBuf::from("/src/app")));
    }

    #[test]
    fn test_parse_binary_archive() {
        let source = parse("https://example.com/app.tar.gz", true).unwrap();
        assert!(source.is_binary());
        assert_eq!(source.kind(), LocatorKind::Remote);
    }

    #[test]
    fn test_parse_binary_rejects_git_locators() {
        assert!(parse("git@github.com:org/app.git", true).is_err());
        assert!(parse("git://github.com/org/app.git", true).is_err());
    }

    #[test]
    fn test_parse_invalid_locators() {
        for raw in [
            "",
            "   ",
            "https://",
            "ftp://example.com/app",
            "https://github.com/org/app.git#",
            "#main",
            "my app",
            "https://github.com/org/app.git#main:../../etc",
        ] {
            let err = parse(raw, false).unwrap_err();
            assert!(
                matches!(err, S2iError::InvalidSource { .. }),
                "expected InvalidSource for {:?}",
                raw
            );
        }
    }
}
