//! プロジェクトディレクトリ単位のデプロイロック
//!
//! `.deploy-lock` の排他作成でデプロイを直列化する。保持者のPIDが
//! プロセス表に存在しなければstaleとみなして奪取する。解放は
//! [`DeployLock`] のDropで冪等に行われるため、どの経路で終了しても
//! ロックが残らない。

use chrono::{DateTime, Utc};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = ".deploy-lock";

/// ロックファイルの内容: `pid\nstarted_at_rfc3339`
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub pid: i32,
    pub started_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    pub fn age_seconds(&self) -> i64 {
        self.started_at
            .map(|t| (Utc::now() - t).num_seconds().max(0))
            .unwrap_or(0)
    }
}

/// 取得済みロック。Dropで解放される
pub struct DeployLock {
    path: PathBuf,
    released: bool,
}

pub enum AcquireOutcome {
    Acquired(DeployLock),
    /// 生きているプロセスが保持している
    Held { pid: i32, age_seconds: i64 },
}

/// ロックの取得を試みる。
///
/// 既存ロックの保持者が死んでいる（または内容が壊れている）場合は
/// 一度だけ削除して再試行する。再試行でも衝突したら保持中として扱う。
pub fn acquire(dir: &Path) -> io::Result<AcquireOutcome> {
    let path = dir.join(LOCK_FILE);

    for attempt in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                writeln!(file, "{}", Utc::now().to_rfc3339())?;
                return Ok(AcquireOutcome::Acquired(DeployLock {
                    path,
                    released: false,
                }));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match read_info(dir) {
                    Some(info) if pid_alive(info.pid) => {
                        return Ok(AcquireOutcome::Held {
                            pid: info.pid,
                            age_seconds: info.age_seconds(),
                        });
                    }
                    _ if attempt == 0 => {
                        // stale または壊れたロック。削除して再試行
                        let _ = std::fs::remove_file(&path);
                    }
                    info => {
                        // 奪取の競合に負けた
                        return Ok(AcquireOutcome::Held {
                            pid: info.map(|i| i.pid).unwrap_or(0),
                            age_seconds: 0,
                        });
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("lock acquisition loops at most twice");
}

pub fn read_info(dir: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(dir.join(LOCK_FILE)).ok()?;
    let mut lines = content.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    let started_at = lines
        .next()
        .and_then(|line| DateTime::parse_from_rfc3339(line.trim()).ok())
        .map(|t| t.with_timezone(&Utc));
    Some(LockInfo { pid, started_at })
}

impl DeployLock {
    /// 冪等な解放。ファイルが既に無くても成功扱い
    pub fn release(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// `kill(pid, 0)` 相当。EPERMは「存在するが権限が無い」なので生存扱い
fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
