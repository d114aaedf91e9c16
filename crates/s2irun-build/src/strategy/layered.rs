use super::dockerfile::{DockerfileParams, RuntimeStage, render};
use super::{BuildResult, Prepared, StrategyExecutor, StrategyKind};
use crate::auth::credentials_map;
use crate::context::ContextBuilder;
use crate::error::{BuildError, Result};
use crate::scripts::SCRIPTS_URL_LABEL;
use crate::util::write_atomic;

/// 生成したDockerfileで assemble を実行するイメージをビルド
pub(super) async fn build(executor: &StrategyExecutor, prepared: &Prepared<'_>) -> Result<BuildResult> {
    let cfg = prepared.cfg;
    let docker = prepared.docker;
    let mut result = BuildResult::new(StrategyKind::Layered);

    let incremental_from = if cfg.incremental && !prepared.tag.is_empty() {
        let credentials = executor
            .auth
            .pull_credentials(&prepared.tag, &cfg.pull_authentication)?;
        let exists = docker
            .ensure_image(
                &prepared.tag,
                cfg.previous_image_pull_policy(),
                credentials,
                false,
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Previous image {} is not available: {}", prepared.tag, e);
                false
            });
        if exists {
            result
                .messages
                .push(format!("Reusing artifacts from {}", prepared.tag));
            Some(prepared.tag.as_str())
        } else {
            tracing::info!("Clean build will be performed: no previous image {}", prepared.tag);
            None
        }
    } else {
        None
    };

    let runtime = if cfg.runtime_image.is_empty() {
        None
    } else {
        let credentials = executor
            .auth
            .pull_credentials(&cfg.runtime_image, &cfg.pull_authentication)?;
        docker
            .ensure_image(
                &cfg.runtime_image,
                cfg.runtime_image_pull_policy(),
                credentials,
                true,
            )
            .await?;
        Some(RuntimeStage {
            image: &cfg.runtime_image,
            artifacts: &cfg.runtime_artifacts,
        })
    };

    let scripts = executor
        .scripts
        .resolve(
            &cfg.scripts_url,
            &prepared.source.root,
            prepared.metadata.label(SCRIPTS_URL_LABEL),
            prepared.work_dir,
            incremental_from.is_some(),
        )
        .await?;
    if incremental_from.is_some() && scripts.save_artifacts.is_none() {
        tracing::warn!("save-artifacts script not found, artifacts will not be reused");
    }

    let dockerfile = render(&DockerfileParams {
        builder_image: &cfg.builder_image,
        scripts: &scripts,
        environment: &cfg.environment,
        labels: &prepared.labels,
        incremental_from,
        runtime,
        user: &prepared.metadata.user,
    });
    tracing::debug!("Generated Dockerfile:\n{}", dockerfile);

    let dockerfile_path = prepared.work_dir.join("Dockerfile");
    write_atomic(&dockerfile_path, dockerfile.as_bytes()).map_err(|source| {
        BuildError::DockerfileWrite {
            path: dockerfile_path.clone(),
            source,
        }
    })?;

    let context = ContextBuilder::create_context(prepared.work_dir, "Dockerfile")?;
    let built = docker
        .build_image(
            context,
            "Dockerfile",
            &prepared.tag,
            credentials_map(prepared.pull_credentials.clone()),
            prepared.timeout(),
        )
        .await?;

    result.image_name = prepared.tag.clone();
    result.image_id = built.id;
    result.messages.extend(built.log);
    result.messages.push(format!(
        "Build completed successfully: {} ({})",
        result.image_name, result.image_id
    ));
    result.success = true;
    Ok(result)
}
