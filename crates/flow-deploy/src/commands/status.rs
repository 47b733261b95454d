//! status サブコマンド（読み取り専用。ロックは取らない）

use crate::compose::{ComposeCommand, ComposeInvoker};
use crate::engine::short_id;
use crate::log::Logger;
use crate::tags;
use flow_deploy_container::{ContainerProbe, DockerProbe, Health};
use flow_deploy_manifest::parse_manifest;
use std::path::Path;

pub async fn handle() -> anyhow::Result<i32> {
    let log = Logger::new();
    let compose = ComposeCommand::resolve();

    let yaml = match compose.config().await {
        Ok(yaml) => yaml,
        Err(e) => {
            log.error(&format!("{e:#}"));
            return Ok(1);
        }
    };
    let manifest = parse_manifest(&yaml)?;
    let probe = DockerProbe::connect()?;

    let current = tags::current(Path::new("."));
    log.info(&format!(
        "Current tag: {}",
        current.as_deref().unwrap_or("(none)")
    ));
    log.info("");

    // deploy.roleの無いサービスも含め、マニフェストの全サービスを表示する
    for svc in &manifest.services {
        let containers = probe.list(&svc.name).await.unwrap_or_default();
        if containers.is_empty() {
            log.info(&format!("  {} ({})  no containers", svc.name, svc.role));
            continue;
        }
        for container in containers {
            let health = probe
                .inspect(&container.id)
                .await
                .map(|status| status.health)
                .unwrap_or(Health::None);
            log.info(&format!(
                "  {} ({})  {}  {}  running/{}",
                svc.name,
                svc.role,
                short_id(&container.id),
                container.image,
                health
            ));
        }
    }

    Ok(0)
}
