//! コンテナの観測と停止・削除

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::error::{ProbeError, Result};
use bollard::Docker;
use bollard::models::HealthStatusEnum;
use std::collections::HashMap;

/// コンテナのヘルスチェック状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// start_period 内、または最初の判定待ち
    Starting,
    Healthy,
    Unhealthy,
    /// healthcheckが定義されていない
    None,
}

impl Health {
    fn from_status(status: Option<HealthStatusEnum>) -> Health {
        match status {
            Some(HealthStatusEnum::STARTING) => Health::Starting,
            Some(HealthStatusEnum::HEALTHY) => Health::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => Health::Unhealthy,
            _ => Health::None,
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Starting => write!(f, "starting"),
            Health::Healthy => write!(f, "healthy"),
            Health::Unhealthy => write!(f, "unhealthy"),
            Health::None => write!(f, "none"),
        }
    }
}

/// 観測した1コンテナ分の状態
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub id: String,
    pub image: String,
    pub running: bool,
    pub health: Health,
}

/// コンテナランタイムの観測・操作トレイト
///
/// デプロイエンジンのテストではこのトレイトのフェイク実装を注入する。
#[allow(async_fn_in_trait)]
pub trait ContainerProbe {
    /// サービスの実行中コンテナを作成順（古いものが先）で返す
    async fn list(&self, service: &str) -> Result<Vec<ContainerStatus>>;

    /// コンテナの現在状態を返す
    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus>;

    /// SIGTERMを送り、`timeout_seconds` 待ってからSIGKILL。
    /// コンテナが停止してから返る
    async fn stop(&self, container_id: &str, timeout_seconds: u64) -> Result<()>;

    /// コンテナを削除する。存在しなければ何もしない
    async fn remove(&self, container_id: &str) -> Result<()>;
}

/// Docker API（bollard）によるプローブ実装
pub struct DockerProbe {
    docker: Docker,
}

impl DockerProbe {
    /// ローカルのDockerデーモンに接続する。
    /// 接続は遅延初期化されるため、実際の疎通は最初のAPI呼び出しで検証される
    pub fn connect() -> Result<DockerProbe> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;
        Ok(DockerProbe { docker })
    }
}

impl ContainerProbe for DockerProbe {
    async fn list(&self, service: &str) -> Result<Vec<ContainerStatus>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("com.docker.compose.service={}", service)],
        );
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let options = bollard::container::ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;

        let mut containers: Vec<(i64, ContainerStatus)> = summaries
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                Some((
                    c.created.unwrap_or(0),
                    ContainerStatus {
                        id,
                        image: c.image.unwrap_or_default(),
                        running: true,
                        // ps相当の一覧にはヘルスの詳細が無いのでinspectで取る
                        health: Health::None,
                    },
                ))
            })
            .collect();

        // 作成順（古いものが先）。同時刻はidで安定化
        containers.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(containers.into_iter().map(|(_, c)| c).collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus> {
        let response = self
            .docker
            .inspect_container(
                container_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => ProbeError::ContainerNotFound {
                    container: container_id.to_string(),
                },
                other => other.into(),
            })?;

        let state = response
            .state
            .ok_or_else(|| ProbeError::MalformedInspect {
                container: container_id.to_string(),
                reason: "state がありません".to_string(),
            })?;

        Ok(ContainerStatus {
            id: response.id.unwrap_or_else(|| container_id.to_string()),
            image: response
                .config
                .and_then(|c| c.image)
                .unwrap_or_default(),
            running: state.running.unwrap_or(false),
            health: Health::from_status(state.health.and_then(|h| h.status)),
        })
    }

    async fn stop(&self, container_id: &str, timeout_seconds: u64) -> Result<()> {
        let options = bollard::query_parameters::StopContainerOptions {
            t: Some(timeout_seconds as i32),
            ..Default::default()
        };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            // 304 = 既に停止している
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                container_id,
                None::<bollard::query_parameters::RemoveContainerOptions>,
            )
            .await
        {
            Ok(_) => Ok(()),
            // 404 = 既に存在しない。削除は冪等に扱う
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
