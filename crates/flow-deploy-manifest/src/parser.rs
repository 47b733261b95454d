//! マージ済みcompose設定（YAML）のパース
//!
//! compose wrapperの `config` 出力を対象とするため、overrideファイルの
//! マージや変数展開は済んでいる前提。ここでは `deploy.*` ラベルの解釈と
//! 数値ラベルの検証だけを行う。未知の `deploy.*` ラベルは将来互換のため
//! 無視する。

use crate::error::{ManifestError, Result};
use crate::model::{Manifest, Role, ServiceConfig};
use serde_yaml::Value;
use std::collections::HashMap;

const DEFAULT_ORDER: i64 = 100;
const DEFAULT_DRAIN_SECONDS: u64 = 30;
const DEFAULT_HEALTHCHECK_TIMEOUT: u64 = 120;
const DEFAULT_HEALTHCHECK_POLL: u64 = 2;

/// YAML文字列をパースして [`Manifest`] を返す
pub fn parse_manifest(yaml: &str) -> Result<Manifest> {
    let root: Value = serde_yaml::from_str(yaml)?;
    if root.is_null() {
        return Ok(Manifest::default());
    }
    if !root.is_mapping() {
        return Err(ManifestError::InvalidManifest(
            "トップレベルがマッピングではありません".to_string(),
        ));
    }

    let x_deploy = root
        .get("x-deploy")
        .and_then(Value::as_mapping)
        .map(parse_string_mapping)
        .unwrap_or_default();

    let services_map = match root.get("services") {
        Some(v) => v.as_mapping().ok_or_else(|| {
            ManifestError::InvalidManifest("services がマッピングではありません".to_string())
        })?,
        Option::None => return Ok(Manifest::default()),
    };

    let mut services = Vec::new();
    for (position, (key, svc)) in services_map.iter().enumerate() {
        let name = key
            .as_str()
            .ok_or_else(|| {
                ManifestError::InvalidManifest("サービス名が文字列ではありません".to_string())
            })?
            .to_string();

        let labels = parse_labels(svc.get("labels"));
        let role = Role::parse(&name, labels.get("deploy.role").map(String::as_str))?;

        let host = labels
            .get("deploy.host")
            .cloned()
            .or_else(|| x_deploy.get("host").cloned());
        let user = labels
            .get("deploy.user")
            .cloned()
            .or_else(|| x_deploy.get("user").cloned());
        let dir = labels
            .get("deploy.dir")
            .cloned()
            .or_else(|| x_deploy.get("dir").cloned());

        services.push(ServiceConfig {
            order: label_i64(&labels, &name, "deploy.order", DEFAULT_ORDER)?,
            drain_seconds: label_u64(&labels, &name, "deploy.drain", DEFAULT_DRAIN_SECONDS)?,
            healthcheck_timeout_seconds: positive_label(
                &labels,
                &name,
                "deploy.healthcheck.timeout",
                DEFAULT_HEALTHCHECK_TIMEOUT,
            )?,
            healthcheck_poll_seconds: positive_label(
                &labels,
                &name,
                "deploy.healthcheck.poll",
                DEFAULT_HEALTHCHECK_POLL,
            )?,
            image: svc
                .get("image")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            has_healthcheck: has_healthcheck(svc),
            name,
            role,
            host,
            user,
            dir,
            position,
        });
    }

    Ok(Manifest { services })
}

/// labels はマッピング形式と `key=value` のリスト形式の両方を受け付ける
fn parse_labels(value: Option<&Value>) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    match value {
        Some(Value::Mapping(map)) => {
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    labels.insert(key.to_string(), scalar_to_string(v));
                }
            }
        }
        Some(Value::Sequence(items)) => {
            for item in items {
                if let Some(entry) = item.as_str() {
                    let (key, val) = entry.split_once('=').unwrap_or((entry, ""));
                    labels.insert(key.to_string(), val.to_string());
                }
            }
        }
        _ => {}
    }
    labels
}

/// compose configはラベル値を文字列化するが、手書きYAMLでは数値や真偽値の
/// こともあるためスカラーをそのまま文字列に落とす
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn has_healthcheck(svc: &Value) -> bool {
    svc.get("healthcheck")
        .and_then(|hc| hc.get("test"))
        .is_some_and(|test| !test.is_null())
}

fn label_i64(
    labels: &HashMap<String, String>,
    service: &str,
    label: &str,
    default: i64,
) -> Result<i64> {
    match labels.get(label) {
        Option::None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ManifestError::InvalidLabel {
                service: service.to_string(),
                label: label.to_string(),
                value: raw.clone(),
            }),
    }
}

fn label_u64(
    labels: &HashMap<String, String>,
    service: &str,
    label: &str,
    default: u64,
) -> Result<u64> {
    match labels.get(label) {
        Option::None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ManifestError::InvalidLabel {
                service: service.to_string(),
                label: label.to_string(),
                value: raw.clone(),
            }),
    }
}

/// timeout / poll は 0 を許さない
fn positive_label(
    labels: &HashMap<String, String>,
    service: &str,
    label: &str,
    default: u64,
) -> Result<u64> {
    let value = label_u64(labels, service, label, default)?;
    if value == 0 {
        return Err(ManifestError::InvalidLabel {
            service: service.to_string(),
            label: label.to_string(),
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn parse_string_mapping(map: &serde_yaml::Mapping) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?;
            Some((key.to_string(), scalar_to_string(v)))
        })
        .collect()
}
