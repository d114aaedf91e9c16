use super::dockerfile::render_onbuild;
use super::{BuildResult, Prepared, StrategyKind};
use crate::auth::credentials_map;
use crate::context::ContextBuilder;
use crate::error::{BuildError, Result};
use crate::util::write_atomic;

/// ソースのルートに置くDockerfile名（ソース側のDockerfileを上書きしない）
pub const ONBUILD_DOCKERFILE: &str = "Dockerfile.s2i";

/// `FROM <builder>` のみのDockerfileでビルドし、ONBUILDトリガーに処理を任せる
pub(super) async fn build(prepared: &Prepared<'_>) -> Result<BuildResult> {
    let cfg = prepared.cfg;
    let mut result = BuildResult::new(StrategyKind::Onbuild);

    tracing::info!(
        "Builder image {} has {} ONBUILD instruction(s)",
        cfg.builder_image,
        prepared.metadata.on_build.len()
    );

    let dockerfile = render_onbuild(&cfg.builder_image, &cfg.environment, &prepared.labels);
    // ONBUILDトリガーはコンテキストのルートを参照するため、ソースをそのままコンテキストにする
    let context_root = &prepared.source.root;
    let dockerfile_path = context_root.join(ONBUILD_DOCKERFILE);
    write_atomic(&dockerfile_path, dockerfile.as_bytes()).map_err(|source| {
        BuildError::DockerfileWrite {
            path: dockerfile_path.clone(),
            source,
        }
    })?;

    let context = ContextBuilder::create_context(context_root, ONBUILD_DOCKERFILE)?;
    let built = prepared
        .docker
        .build_image(
            context,
            ONBUILD_DOCKERFILE,
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
