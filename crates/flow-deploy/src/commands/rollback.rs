//! rollback サブコマンド
//!
//! タグ履歴の先頭の1つ前を読み、そのタグで通常のローリングデプロイを
//! 実行するだけ。履歴が1件以下なら何もせず失敗する。

use super::deploy::{self, DeployOpts};
use crate::compose::{ComposeCommand, ComposeInvoker};
use crate::engine::{Clock, TokioClock};
use crate::log::Logger;
use crate::tags;
use flow_deploy_container::{ContainerProbe, DockerProbe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub struct RollbackOpts {
    pub services: Vec<String>,
}

pub async fn handle(opts: RollbackOpts) -> anyhow::Result<i32> {
    let log = Logger::new();
    let compose = ComposeCommand::resolve();
    let probe = DockerProbe::connect()?;
    let cancel = deploy::spawn_cancel_watcher();
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

pub(crate) async fn run<C: ComposeInvoker, P: ContainerProbe, K: Clock>(
    compose: &C,
    probe: &P,
    clock: &K,
    log: &Logger,
    cancel: Arc<AtomicBool>,
    project_dir: &Path,
    opts: &RollbackOpts,
) -> anyhow::Result<i32> {
    let Some(prev) = tags::previous(project_dir) else {
        log.error("ロールバック先のタグがありません（履歴が1件以下です）");
        return Ok(1);
    };

    log.info(&format!("rolling back to tag: {prev}"));
    deploy::run(
        compose,
        probe,
        clock,
        log,
        cancel,
        project_dir,
        &DeployOpts {
            tag: Some(prev),
            services: opts.services.clone(),
            dry_run: false,
        },
    )
    .await
}
