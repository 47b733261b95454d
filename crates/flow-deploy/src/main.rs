//! flow-deploy: composeマニフェストを唯一の設定源とするローリングデプロイ

mod commands;
mod compose;
mod engine;
mod lock;
mod log;
mod self_update;
mod tags;

use clap::{Parser, Subcommand};
use flow_deploy_manifest::ManifestError;

#[derive(Parser)]
#[command(name = "flow-deploy", version)]
#[command(about = "Docker Composeスタックのローリングデプロイ", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 全appサービスをローリングデプロイ
    Deploy {
        /// デプロイするイメージタグ（DEPLOY_TAGとして子プロセスへ渡る）
        #[arg(long)]
        tag: Option<String>,
        /// 対象サービスを限定する（複数指定可）
        #[arg(long = "service")]
        services: Vec<String>,
        /// 実行せずに手順だけ表示
        #[arg(long)]
        dry_run: bool,
    },
    /// 直前に成功したタグへ戻す
    Rollback {
        /// 対象サービスを限定する（複数指定可）
        #[arg(long = "service")]
        services: Vec<String>,
    },
    /// 管理対象サービスの現在状態を表示
    Status,
    /// 接続先ごとのサービス一覧をJSONで出力（外部オーケストレータ向け）
    DiscoverHosts,
    /// 実行中のサービスコンテナ内でコマンドを実行
    Exec {
        service: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// サービスのログを表示
    Logs {
        service: String,
        /// ログをリアルタイムで追跡
        #[arg(short, long)]
        follow: bool,
        /// 末尾から表示する行数
        #[arg(short = 'n', long)]
        tail: Option<u32>,
    },
    /// flow-deploy自体を最新版に更新
    #[command(name = "self-upgrade")]
    SelfUpgrade,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Deploy {
            tag,
            services,
            dry_run,
        } => {
            commands::deploy::handle(commands::deploy::DeployOpts {
                tag,
                services,
                dry_run,
            })
            .await
        }
        Commands::Rollback { services } => {
            commands::rollback::handle(commands::rollback::RollbackOpts { services }).await
        }
        Commands::Status => commands::status::handle().await,
        Commands::DiscoverHosts => commands::discover_hosts::handle().await,
        Commands::Exec { service, command } => commands::exec::handle(service, command).await,
        Commands::Logs {
            service,
            follow,
            tail,
        } => commands::logs::handle(service, follow, tail).await,
        Commands::SelfUpgrade => self_update::handle().await,
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            log::Logger::new().error(&format!("{err:#}"));
            // 設定エラーは3、それ以外の想定外は1
            if err.downcast_ref::<ManifestError>().is_some() {
                3
            } else {
                1
            }
        }
    };
    std::process::exit(code);
}
