//! discover-hosts サブコマンド
//!
//! マニフェストから `(host, user, dir)` ごとのサービス一覧をJSONで
//! 出力する。外部のオーケストレータがこの射影を読んでホストごとに
//! デプロイをfan-outする。単一ノードエンジン自身はこれを使わない。

use crate::compose::{ComposeCommand, ComposeInvoker};
use crate::log::Logger;
use flow_deploy_manifest::{HostOverrides, host_groups, parse_manifest};

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
    let groups = host_groups(&manifest, &env_overrides())?;

    println!("{}", serde_json::to_string_pretty(&groups)?);
    Ok(0)
}

/// CIシークレットから接続先を上書きするための環境変数。
/// 空文字は未指定として扱う
fn env_overrides() -> HostOverrides {
    HostOverrides {
        host: std::env::var("HOST_NAME").ok().filter(|v| !v.is_empty()),
        user: std::env::var("HOST_USER").ok().filter(|v| !v.is_empty()),
    }
}
