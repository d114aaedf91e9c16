//! 1回のビルドの流れ
//!
//! 設定読み込み → 検証 → rootless/デーモンの選択 → ビルド → 結果の記録

use anyhow::{Context, Result};
use s2irun_build::reporter::record_result;
use s2irun_build::{
    BuildResult, CommandRunner, DockerGateway, FileResultSink, Git, OutputResultInfo,
    ResultSink, RootlessExecutor, StrategyExecutor, SystemCommandRunner,
};
use s2irun_core::{BuildConfig, S2iError, normalize_and_validate, source};
use std::path::PathBuf;
use std::sync::Arc;

pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub kaniko_path: Option<PathBuf>,
    pub result_path: Option<PathBuf>,
}

impl RunOptions {
    fn result_sink(&self) -> Arc<dyn ResultSink> {
        match &self.result_path {
            Some(path) if !path.as_os_str().is_empty() => Arc::new(FileResultSink::new(path)),
            _ => Arc::new(FileResultSink::from_env()),
        }
    }
}

/// 設定を読み込んで検証し、ソース記述子を解決する
pub fn load_config(path: &std::path::Path) -> Result<BuildConfig, S2iError> {
    let mut cfg = BuildConfig::load(path)?;
    normalize_and_validate(&mut cfg)?;
    cfg.source = Some(source::parse(&cfg.source_url, cfg.is_binary_url)?);
    Ok(cfg)
}

pub async fn run(options: &RunOptions) -> Result<BuildResult> {
    let config_path = options
        .config_path
        .as_ref()
        .context("no build config given: set S2I_CONFIG_PATH or pass --config")?;
    let cfg = load_config(config_path)?;
    tracing::debug!("Build configuration:\n{}", cfg.describe());

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
    let git = Arc::new(Git::new(runner.clone()));

    if let Some(exec_path) = &options.kaniko_path {
        if RootlessExecutor::is_available(exec_path) {
            tracing::info!("Building with rootless executor {}", exec_path.display());
            let executor =
                RootlessExecutor::new(exec_path, git, runner, options.result_sink())?;
            return Ok(executor.execute(&cfg).await?);
        }
        tracing::warn!(
            "Rootless executor {} not found, falling back to Docker daemon",
            exec_path.display()
        );
    }

    // Dockerfileの生成だけならデーモンに接続しない
    let docker = if cfg.as_dockerfile.is_empty() {
        let gateway = DockerGateway::connect(&cfg.docker_config)?;
        gateway.check_reachable().await?;
        Some(Arc::new(gateway))
    } else {
        None
    };

    let executor = StrategyExecutor::new(docker.clone(), git)?;
    let result = executor.execute(&cfg).await?;

    if let Some(docker) = docker {
        let image = if result.image_name.is_empty() {
            &result.image_id
        } else {
            &result.image_name
        };
        match docker.inspect(image).await {
            Ok(metadata) => record_result(
                options.result_sink().as_ref(),
                &OutputResultInfo::from_image(image, &metadata),
            ),
            Err(e) => tracing::warn!("Could not inspect built image {}: {}", image, e),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2irun_core::ValidationError;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(dir: &std::path::Path, content: &str) -> PathBuf {
        let path = dir.join("config.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_config_resolves_source() {
        let temp_dir = tempdir().unwrap();
        let path = write_config(
            temp_dir.path(),
            r#"{"sourceURL":"https://github.com/org/app.git#v1","builderImage":"builder","tag":"app"}"#,
        );

        let cfg = load_config(&path).unwrap();
        let source = cfg.source().unwrap();
        assert_eq!(source.reference(), Some("v1"));
        assert!(cfg.builder_pull_policy.is_some());
    }

    #[test]
    fn test_load_config_rejects_run_with_dockerfile() {
        let temp_dir = tempdir().unwrap();
        let path = write_config(
            temp_dir.path(),
            r#"{"sourceURL":"https://github.com/org/app.git","builderImage":"builder","asDockerfile":"out/Dockerfile","runImage":true}"#,
        );

        match load_config(&path) {
            Err(S2iError::Validation(errors)) => {
                assert!(errors.contains(&ValidationError::RunWithDockerfile));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_run_without_config_path() {
        let options = RunOptions {
            config_path: None,
            kaniko_path: None,
            result_path: None,
        };
        let err = run(&options).await.unwrap_err();
        assert!(err.to_string().contains("S2I_CONFIG_PATH"));
    }

    #[tokio::test]
    async fn test_missing_kaniko_falls_through_to_dockerfile_build() {
        let temp_dir = tempdir().unwrap();
        let src = temp_dir.path().join("app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("index.js"), "console.log('hi')").unwrap();
        let out = temp_dir.path().join("out").join("Dockerfile");
        let config = serde_json::json!({
            "sourceURL": src.display().to_string(),
            "builderImage": "builder/nodejs:18",
            "tag": "app",
            "asDockerfile": out.display().to_string(),
        });
        let path = write_config(temp_dir.path(), &config.to_string());

        let options = RunOptions {
            config_path: Some(path),
            kaniko_path: Some(temp_dir.path().join("missing-executor")),
            result_path: Some(temp_dir.path().join("result.json")),
        };
        let result = run(&options).await.unwrap();

        assert!(result.success);
        assert!(out.exists());
        assert!(out.parent().unwrap().join("upload/src/index.js").exists());
        // デーモンを使わない経路では結果レコードを書かない
        assert!(!temp_dir.path().join("result.json").exists());
    }

    #[tokio::test]
    async fn test_dockerfile_written_inside_local_source() {
        let temp_dir = tempdir().unwrap();
        let src = temp_dir.path().join("app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("index.js"), "console.log('hi')").unwrap();
        let out = src.join("Dockerfile.gen");
        let config = serde_json::json!({
            "sourceURL": src.display().to_string(),
            "builderImage": "builder/nodejs:18",
            "tag": "app",
            "asDockerfile": out.display().to_string(),
        });
        let path = write_config(temp_dir.path(), &config.to_string());

        let options = RunOptions {
            config_path: Some(path),
            kaniko_path: None,
            result_path: None,
        };
        let result = run(&options).await.unwrap();

        assert!(result.success);
        assert!(out.exists());
        let upload_src = src.join("upload/src");
        assert!(upload_src.join("index.js").exists());
        assert!(!upload_src.join("upload").exists());
    }
}
