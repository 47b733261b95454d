use thiserror::Error;

/// 設定エラー。すべてデプロイ前（pre-flight）に検出され、
/// コンテナに触れる前に実行を中断させる。
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("compose設定のYAMLを解析できません: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("compose設定の形式が不正です: {0}")]
    InvalidManifest(String),

    #[error("サービス '{service}' のラベル {label} が整数ではありません: '{value}'")]
    InvalidLabel {
        service: String,
        label: String,
        value: String,
    },

    #[error("サービス '{service}' の deploy.role が不正です: '{role}'（app / accessory のみ）")]
    UnknownRole { service: String, role: String },

    #[error(
        "ヘルスチェック未定義のappサービスがあります: {services}\n\nヒント:\n  • appロールのサービスには healthcheck の定義が必須です"
    )]
    MissingHealthcheck { services: String },

    #[error("サービス '{service}' は定義されていません")]
    UnknownService { service: String },

    #[error("サービス '{service}' は app ロールではないためデプロイ対象にできません")]
    NotAppService { service: String },

    #[error("デプロイ対象のappサービスがありません")]
    EmptyPlan,

    #[error(
        "サービス '{service}' の接続先が解決できません（不足: {missing}）\n\nヒント:\n  • x-deploy に host / user / dir の既定値を定義してください\n  • またはサービスの deploy.host / deploy.user / deploy.dir ラベルで指定してください"
    )]
    UnresolvedHost { service: String, missing: String },
}

pub type Result<T> = std::result::Result<T, ManifestError>;
