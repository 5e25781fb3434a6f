//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary vaults with task files
//! - A fake launcher script that records its invocations and replies with
//!   canned JSON, standing in for the real coding assistant

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tempfile::TempDir;

use taskdeck::config::{Config, VaultConfig};
use taskdeck::Engine;

/// A temporary vault with a tasks folder and a config pointing at it.
pub struct TestVault {
    pub temp_dir: TempDir,
    pub config: Config,
}

impl TestVault {
    /// Create a vault named `Personal` with a short coalescing window so
    /// watcher tests settle quickly.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let vault = VaultConfig {
            name: "Personal".to_string(),
            path: temp_dir.path().to_path_buf(),
            tasks_folder: "24 Tasks".to_string(),
            launcher: None,
            project_path: None,
            status_folders: None,
        };
        fs::create_dir_all(vault.tasks_dir()).expect("Failed to create tasks dir");
        let config = Config {
            vaults: vec![vault],
            launcher: None,
            coalesce_ms: 50,
            rescan_interval_secs: 300,
        };
        Self { temp_dir, config }
    }

    pub fn vault(&self) -> &VaultConfig {
        &self.config.vaults[0]
    }

    pub fn task_path(&self, name: &str) -> PathBuf {
        self.vault().tasks_dir().join(format!("{}.md", name))
    }

    /// Write a task file with the given frontmatter fields and a small body.
    pub fn write_task(&self, name: &str, frontmatter: &str) -> PathBuf {
        let path = self.task_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(
            &path,
            format!("---\n{}---\n\nBody of {}.\n", frontmatter, name),
        )
        .expect("Failed to write task file");
        path
    }

    /// Build an engine over this vault and run the initial scan.
    pub fn engine(&self) -> Engine {
        let engine = Engine::new(self.config.clone());
        engine.rescan_all();
        engine
    }
}

/// Where the fake launcher logs its invocations, one line of arguments per
/// run.
pub fn invocation_log(dir: &TempDir) -> PathBuf {
    dir.path().join("invocations.log")
}

/// Write an executable shell script that records its arguments and prints
/// the given JSON response.
pub fn write_fake_launcher(dir: &TempDir, response_json: &str) -> PathBuf {
    let path = dir.path().join("fake-launcher.sh");
    let log = invocation_log(dir);
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> '{}'\ncat <<'RESPONSE'\n{}\nRESPONSE\n",
        log.display(),
        response_json
    );
    fs::write(&path, script).expect("Failed to write launcher script");
    let mut perms = fs::metadata(&path)
        .expect("Failed to stat launcher script")
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("Failed to chmod launcher script");
    path
}

/// Write an executable script that prints garbage and exits non-zero,
/// standing in for a launcher that cannot run at all.
pub fn write_crashing_launcher(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("crashing-launcher.sh");
    let log = invocation_log(dir);
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> '{}'\necho 'not json'\nexit 1\n",
        log.display()
    );
    fs::write(&path, script).expect("Failed to write launcher script");
    let mut perms = fs::metadata(&path)
        .expect("Failed to stat launcher script")
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("Failed to chmod launcher script");
    path
}

/// Launcher response whose embedded tool result reports success.
pub fn success_response(session_id: &str) -> String {
    format!(
        r#"{{"type":"result","subtype":"success","result":"done {{\"success\": true}}","session_id":"{}"}}"#,
        session_id
    )
}

/// Launcher response whose embedded tool result reports failure.
pub fn failure_response(session_id: &str) -> String {
    format!(
        r#"{{"type":"result","subtype":"success","result":"oops {{\"success\": false, \"error\": \"simulated failure\"}}","session_id":"{}"}}"#,
        session_id
    )
}

/// All invocation lines the fake launcher recorded so far.
pub fn read_invocations(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(invocation_log(dir))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
