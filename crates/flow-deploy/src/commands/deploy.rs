//! deploy サブコマンド
//!
//! 設定の検証（ここまでは副作用なし）→ ロック取得 → エンジン実行 →
//! 成功時のみタグ履歴を更新、の順で進む。dry-runはロックを取らず、
//! 変更系のサブプロセスも一切起動しない。

use crate::compose::{ComposeCommand, ComposeInvoker};
use crate::engine::{self, Clock, DeployTag, Engine, TokioClock};
use crate::lock::{self, AcquireOutcome};
use crate::log::Logger;
use crate::tags;
use flow_deploy_container::{ContainerProbe, DockerProbe};
use flow_deploy_manifest::{DeployPlan, parse_manifest};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct DeployOpts {
    pub tag: Option<String>,
    pub services: Vec<String>,
    pub dry_run: bool,
}

pub async fn handle(opts: DeployOpts) -> anyhow::Result<i32> {
    let log = Logger::new();
    let compose = ComposeCommand::resolve();
    let probe = DockerProbe::connect()?;
    let cancel = spawn_cancel_watcher();
    run(
        &compose,
        &probe,
        &TokioClock,
        &log,
        cancel,
        Path::new("."),
        &opts,
    )
    .await
}

/// デプロイ1回分の手順。依存をすべて注入で受けるため、
/// テストではフェイクのwrapper・プローブ・時計で駆動できる
pub(crate) async fn run<C: ComposeInvoker, P: ContainerProbe, K: Clock>(
    compose: &C,
    probe: &P,
    clock: &K,
    log: &Logger,
    cancel: Arc<AtomicBool>,
    project_dir: &Path,
    opts: &DeployOpts,
) -> anyhow::Result<i32> {
    let yaml = match compose.config().await {
        Ok(yaml) => yaml,
        Err(e) => {
            log.error(&format!("{e:#}"));
            return Ok(1);
        }
    };

    // 設定エラー（ManifestError）はmainで終了コード3に写される
    let manifest = parse_manifest(&yaml)?;
    let plan = DeployPlan::build(&manifest, &opts.services)?;

    let tag = match &opts.tag {
        Some(t) => DeployTag::requested(t),
        None => DeployTag::manifest_default(tags::current(project_dir)),
    };

    if opts.dry_run {
        engine::dry_run(log, &plan, &tag);
        return Ok(0);
    }

    let _lock = match lock::acquire(project_dir)? {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Held { pid, age_seconds } => {
            log.error(&format!(
                "デプロイロックを取得できません: PID {pid} が保持しています（{age_seconds}秒前に取得）"
            ));
            return Ok(2);
        }
    };

    let engine = Engine::new(compose, probe, clock, log, cancel);
    let report = engine.deploy(&plan, &tag).await;

    if report.success() {
        tags::record(project_dir, &tag.value)?;
    }
    log.step_summary("deploy", &report.summary_rows())?;

    Ok(report.exit_code())
}

/// SIGINT / SIGTERM を中断フラグへ変換する。
/// エンジンはポーリングの切れ目でフラグを確認し、実行中の
/// サブプロセスを巻き戻すことはしない
pub(crate) fn spawn_cancel_watcher() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = flag.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        handle.store(true, Ordering::SeqCst);
    });
    flag
}
