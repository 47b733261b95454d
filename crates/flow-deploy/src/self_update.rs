//! flow-deploy self-upgrade: GitHub Releasesから最新版を取得して置き換える

use colored::Colorize;

const REPO: &str = "flowcanon/flow-deploy";

pub async fn handle() -> anyhow::Result<i32> {
    println!("{}", "🔄 flow-deploy self-upgrade".blue().bold());
    println!();

    let current_version = env!("CARGO_PKG_VERSION");
    println!("現在のバージョン: {}", current_version.cyan());

    // GitHub APIから最新リリース情報を取得
    println!("最新バージョンを確認中...");

    let client = reqwest::Client::new();
    let response = client
        .get(format!(
            "https://api.github.com/repos/{REPO}/releases/latest"
        ))
        .header("User-Agent", "flow-deploy")
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!(
            "GitHubからリリース情報を取得できませんでした: {}",
            response.status()
        );
    }

    let release: serde_json::Value = response.json().await?;
    let latest_version = release["tag_name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("tag_nameが見つかりません"))?
        .trim_start_matches('v');

    println!("最新バージョン: {}", latest_version.green());

    if !is_newer_version(latest_version, current_version) {
        println!();
        println!("{}", "✓ 既に最新版です！".green().bold());
        return Ok(0);
    }

    // ダウンロードURL決定
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    let asset_name = match (os, arch) {
        ("linux", "x86_64") => "flow-deploy-linux-amd64.tar.gz",
        ("linux", "aarch64") => "flow-deploy-linux-arm64.tar.gz",
        ("macos", "aarch64") => "flow-deploy-darwin-arm64.tar.gz",
        ("macos", "x86_64") => "flow-deploy-darwin-amd64.tar.gz",
        _ => {
            anyhow::bail!("このプラットフォームはサポートされていません: {os}-{arch}");
        }
    };

    let download_url = release["assets"]
        .as_array()
        .and_then(|assets| {
            assets
                .iter()
                .find(|a| a["name"].as_str() == Some(asset_name))
                .and_then(|a| a["browser_download_url"].as_str())
        })
        .ok_or_else(|| {
            anyhow::anyhow!("プリビルドバイナリが見つかりません（{asset_name}）")
        })?;

    println!("ダウンロード中: {asset_name}");

    let temp_dir = std::env::temp_dir().join("flow-deploy-update");
    std::fs::create_dir_all(&temp_dir)?;
    let tar_path = temp_dir.join(asset_name);

    let response = client.get(download_url).send().await?;
    let bytes = response.bytes().await?;
    std::fs::write(&tar_path, &bytes)?;

    println!("展開中...");

    let output = tokio::process::Command::new("tar")
        .arg("-xzf")
        .arg(&tar_path)
        .arg("-C")
        .arg(&temp_dir)
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!(
            "展開に失敗しました: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let current_exe = std::env::current_exe()?;
    let new_binary = temp_dir.join("flow-deploy");

    println!("インストール中...");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&new_binary)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&new_binary, perms)?;
    }

    // 実行中のバイナリでも「削除→コピー」なら置換できる
    // （削除後も実行中プロセスはinode参照を保持するため）
    if current_exe.exists()
        && let Err(e) = std::fs::remove_file(&current_exe)
    {
        println!();
        println!("{}", "⚠ バイナリの更新に失敗しました。".yellow());
        println!("権限が不足している可能性があります。以下のコマンドを実行してください:");
        println!();
        println!(
            "  sudo cp {} {}",
            new_binary.display(),
            current_exe.display()
        );
        return Err(e.into());
    }

    if let Err(e) = std::fs::copy(&new_binary, &current_exe) {
        println!();
        println!("{}", "⚠ バイナリのコピーに失敗しました。".yellow());
        println!(
            "  sudo cp {} {}",
            new_binary.display(),
            current_exe.display()
        );
        return Err(e.into());
    }

    println!();
    println!(
        "{}",
        format!("✓ flow-deploy {latest_version} に更新しました！")
            .green()
            .bold()
    );

    // クリーンアップ（成功時のみ）
    std::fs::remove_dir_all(&temp_dir).ok();

    Ok(0)
}

/// バージョン比較: new_ver が current_ver より新しければ true
fn is_newer_version(new_ver: &str, current_ver: &str) -> bool {
    let parse_version =
        |v: &str| -> Vec<u32> { v.split('.').filter_map(|s| s.parse().ok()).collect() };

    let new_parts = parse_version(new_ver);
    let current_parts = parse_version(current_ver);

    for (n, c) in new_parts.iter().zip(current_parts.iter()) {
        if n > c {
            return true;
        }
        if n < c {
            return false;
        }
    }

    // 桁数が多い方が新しい (例: 1.0.1 > 1.0)
    new_parts.len() > current_parts.len()
}
