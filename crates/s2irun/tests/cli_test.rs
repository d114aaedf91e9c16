#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn s2irun() -> Command {
    let mut cmd = Command::cargo_bin("s2irun").unwrap();
    cmd.env_remove("S2I_CONFIG_PATH")
        .env_remove("KANIKO_EXEC_PATH")
        .env_remove("S2I_RESULT_PATH")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, config: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    fs::write(&path, config.to_string()).unwrap();
    path
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    s2irun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--kaniko"))
        .stdout(predicate::str::contains("--result-path"));
}

#[test]
fn test_cli_version() {
    s2irun()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("s2irun"));
}

/// 設定ファイル未指定は終了コード1
#[test]
fn test_missing_config_path() {
    s2irun()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("S2I_CONFIG_PATH"));
}

#[test]
fn test_config_file_not_found() {
    let temp_dir = TempDir::new().unwrap();
    s2irun()
        .env("S2I_CONFIG_PATH", temp_dir.path().join("missing.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("設定ファイルが見つかりません"));
}

#[test]
fn test_malformed_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();

    s2irun()
        .arg("--config")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("設定ファイルにエラーがあります"));
}

/// asDockerfile と runImage の同時指定はビルド前に拒否される
#[test]
fn test_run_with_as_dockerfile_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out").join("Dockerfile");
    let path = write_config(
        &temp_dir,
        serde_json::json!({
            "sourceURL": "https://github.com/org/app.git",
            "builderImage": "builder/nodejs:18",
            "asDockerfile": out.display().to_string(),
            "runImage": true,
        }),
    );

    s2irun()
        .arg("--config")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "--run cannot be used with --as-dockerfile",
        ));
    assert!(!out.exists());
}

#[test]
fn test_all_validation_errors_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        serde_json::json!({
            "sourceURL": "https://github.com/org/app.git",
            "builderImage": "builder/nodejs:18",
            "runtimeImage": "runtime:1",
            "incremental": true,
            "asDockerfile": "out/Dockerfile",
        }),
    );

    s2irun()
        .arg("--config")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "--runtime-image cannot be used with --as-dockerfile",
        ))
        .stderr(predicate::str::contains(
            "incremental build with runtime image isn't supported",
        ));
}

/// kaniko が存在しない場合はデーモン経路に戻り、Dockerfileを生成できる
#[test]
fn test_as_dockerfile_without_kaniko() {
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("app");
    fs::create_dir_all(src.join(".s2i/bin")).unwrap();
    fs::write(src.join("index.js"), "console.log('hi')").unwrap();
    fs::write(src.join(".s2i/bin/assemble"), "#!/bin/sh\nnpm install\n").unwrap();
    fs::write(src.join(".s2i/bin/run"), "#!/bin/sh\nnode index.js\n").unwrap();
    let out = temp_dir.path().join("out").join("Dockerfile");
    let path = write_config(
        &temp_dir,
        serde_json::json!({
            "sourceURL": src.display().to_string(),
            "builderImage": "builder/nodejs:18",
            "tag": "app",
            "asDockerfile": out.display().to_string(),
        }),
    );

    s2irun()
        .arg("--config")
        .arg(&path)
        .arg("--kaniko")
        .arg(temp_dir.path().join("no-such-executor"))
        .assert()
        .success()
        .stderr(predicate::str::contains("falling back to Docker daemon"));

    let dockerfile = fs::read_to_string(&out).unwrap();
    assert!(dockerfile.contains("FROM builder/nodejs:18"));
    let upload = out.parent().unwrap().join("upload");
    assert!(upload.join("src/index.js").exists());
    assert!(upload.join("scripts/assemble").exists());
}
