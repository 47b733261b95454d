//! logs サブコマンド（compose wrapperへの素通し）

use crate::compose::ComposeCommand;

pub async fn handle(service: String, follow: bool, tail: Option<u32>) -> anyhow::Result<i32> {
    let compose = ComposeCommand::resolve();

    let tail_count;
    let mut args = vec!["logs"];
    if follow {
        args.push("--follow");
    }
    if let Some(n) = tail {
        tail_count = n.to_string();
        args.extend(["--tail", &tail_count]);
    }
    args.push(&service);

    compose.stream(&args).await
}
