//! deploy / rollback の終了コードとファイル副作用をバイナリ越しに確認する。
//! compose wrapperは COMPOSE_COMMAND で差し替えたスタブ。Dockerは不要
//! （コンテナに触れる前に終わる経路だけをここで扱い、状態機械そのものは
//! エンジンのユニットテストで網羅する）。

#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

const CONFIG: &str = r#"services:
  web:
    image: ghcr.io/myorg/myapp:latest
    labels:
      deploy.role: app
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost:8000/health"]
  worker:
    image: ghcr.io/myorg/myapp:latest
    labels:
      deploy.role: app
      deploy.order: "200"
    healthcheck:
      test: ["CMD", "celery", "inspect", "ping"]
  postgres:
    image: postgres:16
    labels:
      deploy.role: accessory"#;

fn flow_deploy(project: &TestProject, stub: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("flow-deploy").unwrap();
    cmd.current_dir(project.path())
        .env("COMPOSE_COMMAND", stub)
        .env_remove("GITHUB_ACTIONS");
    cmd
}

/// dry-runは計画を流すだけで、ロックもタグ履歴も作らない
#[test]
fn test_dry_run_leaves_no_state() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(CONFIG);

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "abc123f", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("▸ web"))
        .stdout(predicate::str::contains("▸ worker"))
        .stdout(predicate::str::contains("dry-run complete"));

    assert!(!project.path().join(".deploy-lock").exists());
    assert!(!project.path().join(".deploy-tag").exists());
}

/// dry-runでもorder順（web → worker）で並ぶ
#[test]
fn test_dry_run_respects_order() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(CONFIG);

    let output = flow_deploy(&project, &stub)
        .args(["deploy", "--dry-run"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    let web = stdout.find("▸ web").unwrap();
    let worker = stdout.find("▸ worker").unwrap();
    assert!(web < worker);
}

/// healthcheckの無いappサービスは終了コード3
#[test]
fn test_missing_healthcheck_exits_3() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(
        "services:\n  web:\n    image: app:latest\n    labels:\n      deploy.role: app",
    );

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "v1"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("web"));

    assert!(!project.path().join(".deploy-lock").exists());
}

/// 未知の--serviceは終了コード3
#[test]
fn test_unknown_service_filter_exits_3() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(CONFIG);

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "v1", "--service", "nope"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("nope"));
}

/// アクセサリを--serviceで指すのも終了コード3
#[test]
fn test_accessory_filter_exits_3() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(CONFIG);

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "v1", "--service", "postgres"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("postgres"));
}

/// 整数でないdeploy.orderは終了コード3
#[test]
fn test_malformed_label_exits_3() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(
        r#"services:
  web:
    image: app:latest
    labels:
      deploy.role: app
      deploy.order: soon
    healthcheck:
      test: ["CMD", "true"]"#,
    );

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "v1"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("deploy.order"));
}

/// compose configの失敗は終了コード1
#[test]
fn test_config_failure_exits_1() {
    let project = TestProject::new();
    let stub = project.write_failing_stub();

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "v1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("compose config failed"));
}

/// 生きているプロセスがロックを保持していれば終了コード2、
/// メッセージに保持者のPIDが入る
#[test]
fn test_live_lock_exits_2() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(CONFIG);

    // このテストプロセス自身を保持者にする
    let pid = std::process::id();
    std::fs::write(
        project.path().join(".deploy-lock"),
        format!("{pid}\n2026-01-01T00:00:00+00:00\n"),
    )
    .unwrap();

    flow_deploy(&project, &stub)
        .args(["deploy", "--tag", "v1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(pid.to_string()));

    // ロックは奪われていない
    let content = std::fs::read_to_string(project.path().join(".deploy-lock")).unwrap();
    assert!(content.starts_with(&pid.to_string()));
}

/// 履歴が1件以下のrollbackは終了コード1
#[test]
fn test_rollback_without_history_exits_1() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(CONFIG);
    std::fs::write(project.path().join(".deploy-tag"), "v1\n").unwrap();

    flow_deploy(&project, &stub)
        .arg("rollback")
        .assert()
        .code(1);

    // 履歴は変わらない
    let content = std::fs::read_to_string(project.path().join(".deploy-tag")).unwrap();
    assert_eq!(content, "v1\n");
}

/// discover-hostsは接続先ごとのJSONを出力する
#[test]
fn test_discover_hosts_json() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(
        r#"x-deploy:
  host: h1
  user: deploy
  dir: /srv/app
services:
  web:
    image: app:latest
    labels:
      deploy.role: app
    healthcheck:
      test: ["CMD", "true"]"#,
    );

    let output = flow_deploy(&project, &stub)
        .arg("discover-hosts")
        .output()
        .unwrap();
    assert!(output.status.success());

    let groups: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("JSONが出力される");
    assert_eq!(groups[0]["host"], "h1");
    assert_eq!(groups[0]["user"], "deploy");
    assert_eq!(groups[0]["dir"], "/srv/app");
    assert_eq!(groups[0]["services"][0], "web");
}

/// 接続先が解決できないdiscover-hostsは終了コード3
#[test]
fn test_discover_hosts_unresolved_exits_3() {
    let project = TestProject::new();
    let stub = project.write_compose_stub(
        r#"services:
  web:
    image: app:latest
    labels:
      deploy.role: app
    healthcheck:
      test: ["CMD", "true"]"#,
    );

    flow_deploy(&project, &stub)
        .arg("discover-hosts")
        .assert()
        .code(3);
}
