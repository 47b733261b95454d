//! タイムスタンプ付き進捗出力とCIログ制御シーケンス
//!
//! 出力はstdoutの単一ストリーム。CIのログコレクタがSSH経由で
//! そのまま取り込める形式を保つ。`GITHUB_ACTIONS=true` のときだけ
//! `::group::` / `::error::` とステップサマリを追加で出す。

use colored::Colorize;
use std::io::Write;

/// 罫線ヘッダの幅
const RULE_WIDTH: usize = 45;

pub struct Logger {
    github: bool,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub fn new() -> Logger {
        Logger {
            github: std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true"),
        }
    }

    #[cfg(test)]
    fn with_github(github: bool) -> Logger {
        Logger { github }
    }

    fn stamp() -> String {
        chrono::Local::now().format("%H:%M:%S").to_string()
    }

    pub fn info(&self, msg: &str) {
        println!("[{}] {}", Self::stamp(), msg);
    }

    /// `── <title> ──…` のセクション開始。GitHub Actionsではグループ化も行う
    pub fn header(&self, title: &str) {
        if self.github {
            println!("::group::{title}");
        }
        self.info(&rule(title));
    }

    pub fn footer(&self, title: &str) {
        self.info(&rule(title));
        if self.github {
            println!("::endgroup::");
        }
    }

    pub fn service_start(&self, name: &str) {
        if self.github {
            println!("::group::{name}");
        }
        self.info(&format!("▸ {name}"));
    }

    pub fn service_end(&self) {
        if self.github {
            println!("::endgroup::");
        }
    }

    pub fn step(&self, msg: &str) {
        self.info(&format!("  {msg}"));
    }

    pub fn success(&self, msg: &str) {
        self.info(&format!("  {} {}", "✓".green(), msg));
    }

    pub fn failure(&self, msg: &str) {
        if self.github {
            println!("::error::{msg}");
        }
        self.info(&format!("  {} {}", "✗".red(), msg));
    }

    pub fn error(&self, msg: &str) {
        if self.github {
            println!("::error::{msg}");
        }
        eprintln!("[{}] {} {}", Self::stamp(), "ERROR:".red(), msg);
    }

    /// `GITHUB_STEP_SUMMARY` が指すファイルにmarkdownのサマリを追記する。
    /// GitHub Actions外では何もしない
    pub fn step_summary(&self, title: &str, rows: &[SummaryRow]) -> std::io::Result<()> {
        if !self.github {
            return Ok(());
        }
        let Ok(path) = std::env::var("GITHUB_STEP_SUMMARY") else {
            return Ok(());
        };
        if path.is_empty() {
            return Ok(());
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "### {title}\n")?;
        writeln!(file, "| service | outcome | elapsed |")?;
        writeln!(file, "| --- | --- | --- |")?;
        for row in rows {
            writeln!(file, "| {} | {} | {} |", row.service, row.outcome, row.elapsed)?;
        }
        writeln!(file)?;
        Ok(())
    }
}

/// ステップサマリの1行分
pub struct SummaryRow {
    pub service: String,
    pub outcome: String,
    pub elapsed: String,
}

fn rule(title: &str) -> String {
    format!(
        "── {title} {}",
        "─".repeat(RULE_WIDTH.saturating_sub(title.chars().count()))
    )
}
