use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • docker ps コマンドが正常に動作するか確認してください"
    )]
    ConnectionFailed(String),

    #[error("コンテナ '{container}' が見つかりません")]
    ContainerNotFound { container: String },

    #[error("コンテナ '{container}' のinspect結果を解釈できません: {reason}")]
    MalformedInspect { container: String, reason: String },

    #[error("Docker APIエラー: {0}")]
    ApiError(String),
}

impl From<bollard::errors::Error> for ProbeError {
    fn from(err: bollard::errors::Error) -> Self {
        let err_str = err.to_string();
        if err_str.contains("Connection refused") || err_str.contains("No such file or directory") {
            ProbeError::ConnectionFailed(err_str)
        } else {
            ProbeError::ApiError(err_str)
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
