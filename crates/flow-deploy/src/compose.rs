//! Compose wrapper resolution + execution.
//!
//! Every mutation of runtime state goes through the project's compose
//! wrapper, resolved once per run: `COMPOSE_COMMAND` env var →
//! `./script/prod` (if executable) → plain `docker compose`. The
//! [`ComposeInvoker`] trait is the seam the deploy engine drives, so
//! tests can substitute a scripted fake.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of one wrapper invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Last non-empty stderr line, for one-line failure reports.
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
    }
}

/// Subprocess seam between the engine and the compose frontend.
///
/// A non-zero exit is not an `Err` at this layer: the engine decides
/// what a failed step means. `Err` is reserved for not being able to
/// spawn the wrapper at all.
#[allow(async_fn_in_trait)]
pub trait ComposeInvoker {
    async fn run(&self, args: &[&str], env: &[(String, String)]) -> anyhow::Result<CommandOutput>;

    /// Fully merged manifest YAML via the wrapper's `config` subcommand.
    async fn config(&self) -> anyhow::Result<String> {
        let out = self.run(&["config"], &[]).await?;
        if !out.success() {
            anyhow::bail!("compose config failed: {}", out.stderr_tail());
        }
        Ok(out.stdout)
    }

    async fn pull(&self, service: &str, env: &[(String, String)]) -> anyhow::Result<CommandOutput> {
        self.run(&["pull", service], env).await
    }

    /// `up -d --no-deps [--no-recreate] --scale <service>=<n> <service>`
    async fn up_scale(
        &self,
        service: &str,
        n: u32,
        no_recreate: bool,
        env: &[(String, String)],
    ) -> anyhow::Result<CommandOutput> {
        let scale = format!("{service}={n}");
        let mut args = vec!["up", "-d", "--no-deps"];
        if no_recreate {
            args.push("--no-recreate");
        }
        args.extend(["--scale", &scale, service]);
        self.run(&args, env).await
    }
}

/// The resolved wrapper command line.
pub struct ComposeCommand {
    argv: Vec<String>,
}

impl ComposeCommand {
    pub fn resolve() -> ComposeCommand {
        Self::resolve_in(Path::new("."))
    }

    pub fn resolve_in(dir: &Path) -> ComposeCommand {
        if let Ok(cmd) = std::env::var("COMPOSE_COMMAND")
            && !cmd.trim().is_empty()
        {
            return ComposeCommand {
                argv: cmd.split_whitespace().map(str::to_string).collect(),
            };
        }

        let script = dir.join("script/prod");
        if is_executable(&script) {
            return ComposeCommand {
                argv: vec![script.to_string_lossy().into_owned()],
            };
        }

        ComposeCommand {
            argv: vec!["docker".to_string(), "compose".to_string()],
        }
    }

    /// Run with inherited stdio, for `exec` / `logs` pass-throughs.
    pub async fn stream(&self, args: &[&str]) -> anyhow::Result<i32> {
        tracing::debug!("streaming: {} {}", self.argv.join(" "), args.join(" "));
        let status = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .args(args)
            .status()
            .await?;
        Ok(status.code().unwrap_or(1))
    }
}

impl ComposeInvoker for ComposeCommand {
    async fn run(&self, args: &[&str], env: &[(String, String)]) -> anyhow::Result<CommandOutput> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("running: {} {}", self.argv.join(" "), args.join(" "));

        let output = cmd.output().await?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.is_file()
            && std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
