//! コンテナランタイムへの直接問い合わせ
//!
//! compose wrapperを経由せず、Docker APIでコンテナのid・ヘルス状態・
//! イメージを取得する。デプロイエンジンはこのクレートの
//! [`ContainerProbe`] トレイト越しにランタイムを観測・操作する。

pub mod error;
pub mod probe;

pub use error::{ProbeError, Result};
pub use probe::{ContainerProbe, ContainerStatus, DockerProbe, Health};
