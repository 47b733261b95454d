//! サービス定義とデプロイ計画のモデル

use crate::error::{ManifestError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// `deploy.role` ラベルによるサービスの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// ローリングデプロイの対象
    App,
    /// デプロイでは一切触らない補助サービス（DB等）
    Accessory,
    /// ラベルなし。status には表示されるが計画には載らない
    None,
}

impl Role {
    pub(crate) fn parse(service: &str, value: Option<&str>) -> Result<Self> {
        match value {
            Option::None => Ok(Role::None),
            Some("app") => Ok(Role::App),
            Some("accessory") => Ok(Role::Accessory),
            Some(other) => Err(ManifestError::UnknownRole {
                service: service.to_string(),
                role: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::App => write!(f, "app"),
            Role::Accessory => write!(f, "accessory"),
            Role::None => write!(f, "none"),
        }
    }
}

/// マージ済みcompose設定から抽出した1サービス分の設定
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub role: Role,
    pub image: Option<String>,
    /// デプロイ順序。小さいほど先。既定は100
    pub order: i64,
    /// SIGTERM から SIGKILL までの猶予（秒）
    pub drain_seconds: u64,
    pub healthcheck_timeout_seconds: u64,
    pub healthcheck_poll_seconds: u64,
    pub has_healthcheck: bool,
    pub host: Option<String>,
    pub user: Option<String>,
    pub dir: Option<String>,
    /// マニフェスト内での出現位置。order が同値のときの順序を決める
    pub position: usize,
}

impl ServiceConfig {
    pub fn is_app(&self) -> bool {
        self.role == Role::App
    }
}

/// マージ済みcompose設定全体。サービスはマニフェストの出現順
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub services: Vec<ServiceConfig>,
}

impl Manifest {
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// 1回のデプロイで処理するappサービスの順序付きリスト
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub services: Vec<ServiceConfig>,
    /// 設定上は許容するが通知すべき事項（order の重複など）
    pub warnings: Vec<String>,
}

impl DeployPlan {
    /// マニフェストとフィルタからデプロイ計画を構築する。
    ///
    /// appロールのサービスを `(order, position)` 昇順に並べる。
    /// フィルタが未知のサービス・app以外のサービスを指すとき、
    /// またはappサービスにヘルスチェックが無いときは設定エラー。
    pub fn build(manifest: &Manifest, filter: &[String]) -> Result<DeployPlan> {
        for name in filter {
            match manifest.service(name) {
                Option::None => {
                    return Err(ManifestError::UnknownService {
                        service: name.clone(),
                    });
                }
                Some(svc) if !svc.is_app() => {
                    return Err(ManifestError::NotAppService {
                        service: name.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        let mut services: Vec<ServiceConfig> = manifest
            .services
            .iter()
            .filter(|s| s.is_app())
            .filter(|s| filter.is_empty() || filter.iter().any(|f| f == &s.name))
            .cloned()
            .collect();

        if services.is_empty() {
            return Err(ManifestError::EmptyPlan);
        }

        let missing: Vec<&str> = services
            .iter()
            .filter(|s| !s.has_healthcheck)
            .map(|s| s.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ManifestError::MissingHealthcheck {
                services: missing.join(", "),
            });
        }

        services.sort_by_key(|s| (s.order, s.position));

        let mut warnings = Vec::new();
        for pair in services.windows(2) {
            if pair[0].order == pair[1].order {
                warnings.push(format!(
                    "サービス '{}' と '{}' の deploy.order が同値です（{}）。マニフェストの記述順で処理します",
                    pair[0].name, pair[1].name, pair[0].order
                ));
            }
        }

        Ok(DeployPlan { services, warnings })
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }
}

/// 外部オーケストレータ向けの射影: 接続先ごとのサービス一覧
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostGroup {
    pub host: String,
    pub user: String,
    pub dir: String,
    pub services: Vec<String>,
}

/// CI環境変数などから与えるhost/userの上書き。
/// 上書きするとラベル・x-deploy の解決結果より優先される
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    pub host: Option<String>,
    pub user: Option<String>,
}

/// appサービスを `(host, user, dir)` でグループ化する。
///
/// グループの順序は計画順での初出順。hostを上書きすると
/// 別ホスト扱いだったサービスが同一グループに畳み込まれることがある。
pub fn host_groups(manifest: &Manifest, overrides: &HostOverrides) -> Result<Vec<HostGroup>> {
    let plan = DeployPlan::build(manifest, &[])?;

    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut groups: HashMap<(String, String, String), Vec<String>> = HashMap::new();

    for svc in &plan.services {
        let host = overrides.host.clone().or_else(|| svc.host.clone());
        let user = overrides.user.clone().or_else(|| svc.user.clone());
        let dir = svc.dir.clone();

        let mut missing = Vec::new();
        if host.is_none() {
            missing.push("host");
        }
        if user.is_none() {
            missing.push("user");
        }
        if dir.is_none() {
            missing.push("dir");
        }
        if !missing.is_empty() {
            return Err(ManifestError::UnresolvedHost {
                service: svc.name.clone(),
                missing: missing.join(", "),
            });
        }

        let key = (host.unwrap(), user.unwrap(), dir.unwrap());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(svc.name.clone());
    }

    Ok(order
        .into_iter()
        .map(|key| {
            let services = groups.remove(&key).unwrap_or_default();
            HostGroup {
                host: key.0,
                user: key.1,
                dir: key.2,
                services,
            }
        })
        .collect())
}
