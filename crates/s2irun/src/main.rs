mod run;

use clap::Parser;
use colored::Colorize;
use s2irun_build::{BuildError, ErrorKind};
use s2irun_core::S2iError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "s2irun", version)]
#[command(about = "ソースコードからコンテナイメージをビルドする", long_about = None)]
struct Cli {
    /// ビルド設定ファイル (JSON)
    #[arg(short, long, env = "S2I_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// rootlessビルドに使う kaniko executor のパス
    #[arg(long, env = "KANIKO_EXEC_PATH")]
    kaniko: Option<PathBuf>,

    /// ビルド結果の書き出し先（既定: /dev/termination-log）
    #[arg(long, env = "S2I_RESULT_PATH")]
    result_path: Option<PathBuf>,

    /// デバッグログを出力
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// 既知のエラー型であれば対処方法付きのメッセージを返す
fn user_message(error: &anyhow::Error) -> String {
    if let Some(e) = error.downcast_ref::<BuildError>() {
        return e.user_message();
    }
    if let Some(e) = error.downcast_ref::<S2iError>() {
        return e.user_message();
    }
    format!("{:#}", error)
}

/// エラーの分類（BuildError以外は設定読み込み時のエラー）
fn error_kind(error: &anyhow::Error) -> &'static str {
    if let Some(e) = error.downcast_ref::<BuildError>() {
        return e.kind().as_str();
    }
    if let Some(e) = error.downcast_ref::<S2iError>() {
        return ErrorKind::from_core(e).as_str();
    }
    ErrorKind::Config.as_str()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = run::RunOptions {
        config_path: cli.config,
        kaniko_path: cli.kaniko,
        result_path: cli.result_path,
    };

    match run::run(&options).await {
        Ok(result) => {
            for message in &result.messages {
                tracing::info!("{}", message);
            }
            println!(
                "{} {}",
                "✓".green().bold(),
                if result.image_name.is_empty() {
                    "Build completed".to_string()
                } else {
                    format!("Build completed: {}", result.image_name)
                }
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = error_kind(&e), "Build failed: {:#}", e);
            eprintln!("{} {}", "Error:".red().bold(), user_message(&e));
            ExitCode::FAILURE
        }
    }
}
