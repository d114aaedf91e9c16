//! イメージタグのテンプレート展開と名前解決
//!
//! - `${DATE}` → `YYYYMMDDHHMMSS`
//! - `${COMMIT}` → コミットIDの先頭8文字
//! - リポジトリ名前空間のないタグはpushユーザー名で修飾
//! - レジストリホストのない名前はpush先レジストリで修飾

use crate::error::{Result, S2iError};
use chrono::{DateTime, TimeZone};
use std::fmt;

pub const DATE_PLACEHOLDER: &str = "${DATE}";
pub const COMMIT_PLACEHOLDER: &str = "${COMMIT}";

/// タグに使うコミットIDの長さ
pub const SHORT_COMMIT_LEN: usize = 8;

const DATE_FORMAT: &str = "%Y%m%d%H%M%S";
const MAX_TAG_LEN: usize = 128;

/// コミットIDを8文字に切り詰める（8文字以下はそのまま）
pub fn short_commit(commit: &str) -> &str {
    match commit.char_indices().nth(SHORT_COMMIT_LEN) {
        Some((idx, _)) => &commit[..idx],
        None => commit,
    }
}

/// 日付とコミットのプレースホルダーを置換
pub fn substitute(template: &str, date: &str, commit: &str) -> String {
    template
        .replace(DATE_PLACEHOLDER, date)
        .replace(COMMIT_PLACEHOLDER, short_commit(commit))
}

/// 指定時刻でタグテンプレートを展開
pub fn render<Tz: TimeZone>(template: &str, now: &DateTime<Tz>, commit: &str) -> String
where
    Tz::Offset: fmt::Display,
{
    let date = now.format(DATE_FORMAT).to_string();
    substitute(template, &date, commit)
}

/// 名前空間のないタグをユーザー名で修飾
///
/// # Examples
/// - `myapp` + `alice` -> `alice/myapp`
/// - `team/myapp` + `alice` -> `team/myapp`
pub fn qualify_namespace(tag: &str, username: &str) -> String {
    if tag.contains('/') || username.is_empty() {
        return tag.to_string();
    }
    format!("{}/{}", username, tag)
}

/// 完全修飾されたイメージ参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// イメージ名を解析し、レジストリがなければ `default_registry` を付与
    ///
    /// # Examples
    /// - `alice/app:v1` + `reg.local` -> `reg.local/alice/app:v1`
    /// - `ghcr.io/org/app` + `reg.local` -> `ghcr.io/org/app:latest`
    /// - `localhost:5000/app:dev` -> `localhost:5000/app:dev`
    pub fn parse(name: &str, default_registry: &str) -> Result<Self> {
        let invalid = |reason: String| S2iError::InvalidImageName {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("image name is empty".to_string()));
        }

        let (without_tag, tag) = split_image_tag(name);
        let (registry, repository) = match without_tag.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => {
                (Some(first.to_string()), rest.to_string())
            }
            _ => {
                let registry = Some(default_registry.trim_end_matches('/'))
                    .filter(|r| !r.is_empty())
                    .map(str::to_string);
                (registry, without_tag)
            }
        };

        validate_repository(&repository).map_err(invalid)?;
        validate_tag(&tag).map_err(invalid)?;

        Ok(Self {
            registry,
            repository,
            tag,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.registry {
            Some(registry) => write!(f, "{}/{}:{}", registry, self.repository, self.tag),
            None => write!(f, "{}:{}", self.repository, self.tag),
        }
    }
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app` -> `("localhost:5000/app", "latest")`
pub fn split_image_tag(image: &str) -> (String, String) {
    let image = image.split_once('@').map_or(image, |(name, _digest)| name);
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // ポート番号（localhost:5000/app）は / を含む
        if !potential_tag.contains('/') {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// パス先頭の要素がレジストリホストかどうか
fn is_registry_host(first: &str) -> bool {
    first.contains('.') || first.contains(':') || first == "localhost"
}

fn validate_repository(repository: &str) -> std::result::Result<(), String> {
    if repository.is_empty() {
        return Err("repository is empty".to_string());
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err("repository contains an empty path component".to_string());
        }
        if let Some(c) = component.chars().find(|c| {
            !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        }) {
            return Err(format!("invalid character '{}' in repository", c));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    if tag.is_empty() {
        return Err("tag is empty".to_string());
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(format!(
            "tag too long ({} characters, max {})",
            tag.len(),
            MAX_TAG_LEN
        ));
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        return Err("tag must not start with '.' or '-'".to_string());
    }
    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        return Err(format!("invalid character '{}' in tag", c));
    }
    Ok(())
}
