//! マージ済みcompose設定からデプロイ計画を構築するクレート
//!
//! compose wrapperの `config` 出力（オーバーライド・変数展開済みのYAML）を
//! 入力とし、`deploy.*` ラベルを解釈してサービスを分類する。
//! 単一ノードエンジン向けの [`DeployPlan`] と、外部オーケストレータ向けの
//! [`HostGroup`] 射影の両方をここで計算する。

pub mod error;
pub mod model;
pub mod parser;

pub use error::{ManifestError, Result};
pub use model::{DeployPlan, HostGroup, HostOverrides, Manifest, Role, ServiceConfig, host_groups};
pub use parser::parse_manifest;
