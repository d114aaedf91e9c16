//! 設定の正規化と検証
//!
//! 既定のpullポリシーを補完した上で、相互排他な設定の組み合わせを
//! すべて収集して返します（最初のエラーで打ち切らない）。

use crate::config::{
    BuildConfig, DEFAULT_BUILDER_PULL_POLICY, DEFAULT_PREVIOUS_IMAGE_PULL_POLICY,
    DEFAULT_RUNTIME_IMAGE_PULL_POLICY,
};
use crate::error::{ValidationError, ValidationErrors};
use tracing::debug;

/// 未設定のpullポリシーに既定値を設定
pub fn normalize(cfg: &mut BuildConfig) {
    if cfg.builder_pull_policy.is_none() {
        debug!(policy = %DEFAULT_BUILDER_PULL_POLICY, "Defaulting builder pull policy");
        cfg.builder_pull_policy = Some(DEFAULT_BUILDER_PULL_POLICY);
    }
    if cfg.previous_image_pull_policy.is_none() {
        debug!(policy = %DEFAULT_PREVIOUS_IMAGE_PULL_POLICY, "Defaulting previous image pull policy");
        cfg.previous_image_pull_policy = Some(DEFAULT_PREVIOUS_IMAGE_PULL_POLICY);
    }
    if cfg.runtime_image_pull_policy.is_none() {
        debug!(policy = %DEFAULT_RUNTIME_IMAGE_PULL_POLICY, "Defaulting runtime image pull policy");
        cfg.runtime_image_pull_policy = Some(DEFAULT_RUNTIME_IMAGE_PULL_POLICY);
    }
}

/// 設定を検証し、検出したエラーをすべて返す
pub fn validate(cfg: &BuildConfig) -> ValidationErrors {
    let mut errors = Vec::new();

    if !cfg.as_dockerfile.is_empty() {
        if cfg.run_image {
            errors.push(ValidationError::RunWithDockerfile);
        }
        if !cfg.runtime_image.is_empty() {
            errors.push(ValidationError::RuntimeImageWithDockerfile);
        }
    }

    if cfg.incremental && !cfg.runtime_image.is_empty() {
        errors.push(ValidationError::IncrementalWithRuntimeImage);
    }

    if cfg.builder_image.trim().is_empty() {
        errors.push(ValidationError::Required("builderImage"));
    }

    if cfg.source_url.trim().is_empty() {
        errors.push(ValidationError::Required("sourceURL"));
    }

    ValidationErrors(errors)
}

/// 正規化してから検証する
pub fn normalize_and_validate(cfg: &mut BuildConfig) -> Result<(), ValidationErrors> {
    normalize(cfg);
    let errors = validate(cfg);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
