//! 外部コマンド実行
//!
//! git や rootless ビルダーの起動に使います。テストでは
//! `FakeCommandRunner` に差し替えて呼び出し内容を検証します。

use crate::error::{BuildError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// コマンド実行オプション
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOpts {
    /// 作業ディレクトリ
    pub dir: Option<PathBuf>,
    /// 追加の環境変数
    pub envs: Vec<(String, String)>,
    /// 実行時間の上限
    pub timeout: Option<Duration>,
    /// stdout/stderr を親プロセスにそのまま流す
    pub inherit_output: bool,
}

impl CommandOpts {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn streaming() -> Self {
        Self {
            inherit_output: true,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// コマンドを実行し、終了コードが0以外ならエラー
    async fn run_with_options(&self, opts: &CommandOpts, program: &str, args: &[String])
    -> Result<()>;

    /// コマンドを実行してstdoutを返す
    async fn output(&self, opts: &CommandOpts, program: &str, args: &[String]) -> Result<String>;
}

/// tokio::process によるコマンド実行
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(opts: &CommandOpts, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &opts.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &opts.envs {
            cmd.env(key, value);
        }
        cmd
    }

    async fn wait<F, T>(opts: &CommandOpts, program: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::io::Result<T>>,
    {
        match opts.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| BuildError::Timeout {
                    operation: program.to_string(),
                    seconds: limit.as_secs(),
                })?
                .map_err(BuildError::Io),
            None => fut.await.map_err(BuildError::Io),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run_with_options(
        &self,
        opts: &CommandOpts,
        program: &str,
        args: &[String],
    ) -> Result<()> {
        tracing::debug!("Running: {} {}", program, args.join(" "));

        let mut cmd = Self::command(opts, program, args);
        if opts.inherit_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            let status = Self::wait(opts, program, async { cmd.spawn()?.wait().await }).await?;
            if !status.success() {
                return Err(BuildError::CommandFailed {
                    program: program.to_string(),
                    status: status.to_string(),
                    stderr: String::new(),
                });
            }
            return Ok(());
        }

        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = Self::wait(opts, program, cmd.output()).await?;
        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn output(&self, opts: &CommandOpts, program: &str, args: &[String]) -> Result<String> {
        tracing::debug!("Running: {} {}", program, args.join(" "));

        let mut cmd = Self::command(opts, program, args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = Self::wait(opts, program, cmd.output()).await?;
        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 記録されたコマンド呼び出し
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Invocation {
        pub program: String,
        pub args: Vec<String>,
        pub opts: CommandOpts,
    }

    /// 呼び出しを記録し、設定された結果を返すランナー
    #[derive(Default)]
    pub struct FakeCommandRunner {
        pub invocations: Mutex<Vec<Invocation>>,
        /// "program arg1 arg2" -> stdout
        pub outputs: Mutex<HashMap<String, String>>,
        /// このプログラム名の実行は失敗させる
        pub failing: Mutex<Vec<String>>,
    }

    impl FakeCommandRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_output(&self, command_line: &str, stdout: &str) {
            self.outputs
                .lock()
                .unwrap()
                .insert(command_line.to_string(), stdout.to_string());
        }

        pub fn fail(&self, program: &str) {
            self.failing.lock().unwrap().push(program.to_string());
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.invocations.lock().unwrap().clone()
        }

        fn record(&self, opts: &CommandOpts, program: &str, args: &[String]) -> Result<()> {
            self.invocations.lock().unwrap().push(Invocation {
                program: program.to_string(),
                args: args.to_vec(),
                opts: opts.clone(),
            });
            if self.failing.lock().unwrap().iter().any(|p| p == program) {
                return Err(BuildError::CommandFailed {
                    program: program.to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "Run Error".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CommandRunner for FakeCommandRunner {
        async fn run_with_options(
            &self,
            opts: &CommandOpts,
            program: &str,
            args: &[String],
        ) -> Result<()> {
            self.record(opts, program, args)
        }

        async fn output(
            &self,
            opts: &CommandOpts,
            program: &str,
            args: &[String],
        ) -> Result<String> {
            self.record(opts, program, args)?;
            let key = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_captures_stdout() {
        let runner = SystemCommandRunner::new();
        let out = runner
            .output(&CommandOpts::default(), "sh", &["-c".into(), "echo hello".into()])
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let runner = SystemCommandRunner::new();
        let err = runner
            .run_with_options(
                &CommandOpts::default(),
                "sh",
                &["-c".into(), "echo boom >&2; exit 3".into()],
            )
            .await
            .unwrap_err();
        match err {
            BuildError::CommandFailed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_working_directory_is_applied() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = SystemCommandRunner::new();
        let out = runner
            .output(&CommandOpts::in_dir(temp_dir.path()), "pwd", &[])
            .await
            .unwrap();
        let expected = temp_dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(out.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let runner = SystemCommandRunner::new();
        let opts = CommandOpts::default().with_timeout(Some(Duration::from_millis(100)));
        let err = runner
            .run_with_options(&opts, "sleep", &["5".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Timeout { .. }));
    }
}
