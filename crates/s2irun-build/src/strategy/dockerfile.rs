//! Dockerfile の生成
//!
//! layered / dockerfile 戦略で共通のDockerfileを組み立てます。
//! `asDockerfile` が指定された場合はデーモンを使わずにファイルとして出力します。

use super::{BuildResult, StrategyExecutor, UPLOAD_SRC_DIR, generate_labels};
use crate::error::{BuildError, Result};
use crate::scripts::{IMAGE_SCRIPTS_DIR, Scripts, UPLOAD_SCRIPTS_DIR};
use crate::util::write_atomic;
use s2irun_core::{BuildConfig, EnvironmentSpec, VolumeSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const IMAGE_SRC_DIR: &str = "/tmp/src";
const ARTIFACTS_TAR: &str = "/tmp/artifacts.tar";
const ARTIFACTS_DIR: &str = "/tmp/artifacts";

/// runtimeイメージのステージ
#[derive(Debug, Clone, Copy)]
pub struct RuntimeStage<'a> {
    pub image: &'a str,
    pub artifacts: &'a [VolumeSpec],
}

#[derive(Debug, Clone, Copy)]
pub struct DockerfileParams<'a> {
    pub builder_image: &'a str,
    pub scripts: &'a Scripts,
    pub environment: &'a [EnvironmentSpec],
    pub labels: &'a BTreeMap<String, String>,
    /// インクリメンタルビルドで成果物を取り出す前回のイメージ
    pub incremental_from: Option<&'a str>,
    pub runtime: Option<RuntimeStage<'a>>,
    /// builderイメージのUSER（空なら切り替えない）
    pub user: &'a str,
}

/// Dockerfile の文字列をエスケープ
fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

fn push_labels(lines: &mut Vec<String>, labels: &BTreeMap<String, String>) {
    if labels.is_empty() {
        return;
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}={}", quote(k), quote(v)))
        .collect();
    lines.push(format!("LABEL {}", pairs.join(" \\\n      ")));
}

fn push_env(lines: &mut Vec<String>, environment: &[EnvironmentSpec]) {
    if environment.is_empty() {
        return;
    }
    let pairs: Vec<String> = environment
        .iter()
        .map(|e| format!("{}={}", e.name, quote(&e.value)))
        .collect();
    lines.push(format!("ENV {}", pairs.join(" \\\n    ")));
}

/// 実行形式（JSON配列）のCMD
fn cmd(path: &str) -> String {
    format!("CMD [{}]", quote(path))
}

/// assemble を実行するDockerfileを生成
pub fn render(params: &DockerfileParams<'_>) -> String {
    let scripts = params.scripts;
    let uploaded = scripts.has_uploaded();
    let mut lines = Vec::new();

    let save_artifacts = params
        .incremental_from
        .zip(scripts.save_artifacts_path());
    if let Some((previous, save_artifacts)) = &save_artifacts {
        lines.push(format!("FROM {} as cached", previous));
        if uploaded {
            lines.push("USER root".to_string());
            lines.push(format!("COPY {} {}", UPLOAD_SCRIPTS_DIR, IMAGE_SCRIPTS_DIR));
        }
        if !params.user.is_empty() {
            lines.push(format!("USER {}", params.user));
        }
        lines.push(format!(
            "RUN if [ -s {sa} ]; then {sa} > {tar}; else touch {tar}; fi",
            sa = save_artifacts,
            tar = ARTIFACTS_TAR
        ));
        lines.push(String::new());
    }

    if params.runtime.is_some() {
        lines.push(format!("FROM {} as builder", params.builder_image));
    } else {
        lines.push(format!("FROM {}", params.builder_image));
        push_labels(&mut lines, params.labels);
    }
    push_env(&mut lines, params.environment);

    let mut owned = vec![IMAGE_SRC_DIR];
    if !params.user.is_empty() {
        lines.push("USER root".to_string());
    }
    if uploaded {
        lines.push(format!("COPY {} {}", UPLOAD_SCRIPTS_DIR, IMAGE_SCRIPTS_DIR));
        owned.push(IMAGE_SCRIPTS_DIR);
    }
    lines.push(format!("COPY {} {}", UPLOAD_SRC_DIR, IMAGE_SRC_DIR));
    if save_artifacts.is_some() {
        lines.push(format!("COPY --from=cached {} {}", ARTIFACTS_TAR, ARTIFACTS_TAR));
        owned.push(ARTIFACTS_TAR);
    }
    if !params.user.is_empty() {
        lines.push(format!("RUN chown -R {}:0 {}", params.user, owned.join(" ")));
        lines.push(format!("USER {}", params.user));
    }
    if save_artifacts.is_some() {
        lines.push(format!(
            "RUN mkdir -p {dir} && tar -xf {tar} -C {dir} && rm {tar}",
            dir = ARTIFACTS_DIR,
            tar = ARTIFACTS_TAR
        ));
    }
    lines.push(format!("RUN {}", scripts.assemble_path()));

    match params.runtime {
        Some(runtime) => {
            lines.push(String::new());
            lines.push(format!("FROM {}", runtime.image));
            push_labels(&mut lines, params.labels);
            push_env(&mut lines, params.environment);
            if uploaded {
                lines.push(format!(
                    "COPY --from=builder {} {}",
                    IMAGE_SCRIPTS_DIR, IMAGE_SCRIPTS_DIR
                ));
            }
            for artifact in runtime.artifacts {
                let destination = if artifact.destination.is_empty() {
                    "."
                } else {
                    artifact.destination.as_str()
                };
                lines.push(format!(
                    "COPY --from=builder {} {}",
                    artifact.source, destination
                ));
            }
            if !params.user.is_empty() {
                lines.push(format!("USER {}", params.user));
            }
            lines.push(cmd(&scripts.run_path()));
        }
        None => lines.push(cmd(&scripts.run_path())),
    }

    let mut dockerfile = lines.join("\n");
    dockerfile.push('\n');
    dockerfile
}

/// onbuild 戦略のDockerfile（ONBUILDトリガーにビルドを任せる）
pub fn render_onbuild(
    builder_image: &str,
    environment: &[EnvironmentSpec],
    labels: &BTreeMap<String, String>,
) -> String {
    let mut lines = vec![format!("FROM {}", builder_image)];
    push_labels(&mut lines, labels);
    push_env(&mut lines, environment);
    let mut dockerfile = lines.join("\n");
    dockerfile.push('\n');
    dockerfile
}

/// `asDockerfile` に Dockerfile を、その隣に `upload/` を出力
pub(super) async fn build(executor: &StrategyExecutor, cfg: &BuildConfig) -> Result<BuildResult> {
    let dockerfile_path = PathBuf::from(&cfg.as_dockerfile);
    let out_dir = match dockerfile_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&out_dir)?;

    // 途中で失敗しても既存の出力を壊さないよう、同じディレクトリで組み立ててからrenameする
    let staging = tempfile::Builder::new()
        .prefix(".s2i-")
        .tempdir_in(&out_dir)?;

    let fetched = executor.stage_source(cfg, staging.path()).await?;
    let scripts = executor
        .scripts
        .resolve(&cfg.scripts_url, &fetched.root, None, staging.path(), false)
        .await?;
    let labels = generate_labels(cfg, &fetched.info);

    let dockerfile = render(&DockerfileParams {
        builder_image: &cfg.builder_image,
        scripts: &scripts,
        environment: &cfg.environment,
        labels: &labels,
        incremental_from: None,
        runtime: None,
        user: "",
    });

    replace_upload_dir(&staging.path().join("upload"), &out_dir.join("upload"))?;
    write_atomic(&dockerfile_path, dockerfile.as_bytes()).map_err(|source| {
        BuildError::DockerfileWrite {
            path: dockerfile_path.clone(),
            source,
        }
    })?;

    tracing::info!("Wrote Dockerfile to {}", dockerfile_path.display());
    let mut result = BuildResult::new(super::StrategyKind::Dockerfile);
    result.source_info = fetched.info;
    result
        .messages
        .push(format!("Application dockerfile generated in {}", dockerfile_path.display()));
    result.success = true;
    Ok(result)
}

fn replace_upload_dir(staged: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(staged, dest)?;
    Ok(())
}
