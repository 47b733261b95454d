use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// `config` に固定YAMLを返すcompose wrapperのスタブを書き込む。
    /// 返り値のパスを COMPOSE_COMMAND に渡して使う
    pub fn write_compose_stub(&self, config_yaml: &str) -> PathBuf {
        let path = self.root.path().join("compose-stub.sh");
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = \"config\" ]; then\ncat <<'YAML'\n{config_yaml}\nYAML\nfi\nexit 0\n"
        );
        fs::write(&path, script).unwrap();
        make_executable(&path);
        path
    }

    /// 常に失敗するwrapperスタブ
    #[allow(dead_code)]
    pub fn write_failing_stub(&self) -> PathBuf {
        let path = self.root.path().join("compose-fail.sh");
        fs::write(&path, "#!/bin/sh\necho 'compose error' >&2\nexit 1\n").unwrap();
        make_executable(&path);
        path
    }
}

fn make_executable(path: &std::path::Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
