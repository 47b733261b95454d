//! exec サブコマンド（compose wrapperへの素通し）

use crate::compose::ComposeCommand;
use crate::log::Logger;

pub async fn handle(service: String, command: Vec<String>) -> anyhow::Result<i32> {
    if command.is_empty() {
        Logger::new().error("実行するコマンドが指定されていません");
        return Ok(1);
    }

    let compose = ComposeCommand::resolve();
    let mut args = vec!["exec", service.as_str()];
    args.extend(command.iter().map(String::as_str));
    compose.stream(&args).await
}
