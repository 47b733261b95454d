//! `.deploy-tag` — デプロイ成功タグの履歴
//!
//! 改行区切りで新しいものが先頭。run全体が成功したときだけ
//! [`record`] で先頭に追記し、10件を超えた分は古い方から捨てる。

use std::io;
use std::path::Path;

pub const TAG_FILE: &str = ".deploy-tag";
pub const MAX_HISTORY: usize = 10;

/// 履歴を新しい順で返す。ファイルが無ければ空
pub fn read(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(TAG_FILE))
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// 直近に成功したタグ
pub fn current(dir: &Path) -> Option<String> {
    read(dir).into_iter().next()
}

/// 現在の1つ前のタグ。rollbackの行き先
pub fn previous(dir: &Path) -> Option<String> {
    read(dir).into_iter().nth(1)
}

/// タグを履歴の先頭に記録する
pub fn record(dir: &Path, tag: &str) -> io::Result<()> {
    let mut tags = read(dir);
    tags.insert(0, tag.to_string());
    tags.truncate(MAX_HISTORY);

    let mut content = tags.join("\n");
    content.push('\n');
    std::fs::write(dir.join(TAG_FILE), content)
}
