use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error_handling::types::ProcessError;
use crate::process::command::supervise;
use crate::process::types::CriticalLevel;

/// Overrides where script bodies are written before execution.
pub const SCRIPT_DIR_ENV: &str = "MIEL_SCRIPT_DIR";

fn default_shell() -> String {
    "/bin/sh".to_string()
}

/// A script body handed to a shell through a temporary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptProcess {
    #[serde(default = "default_shell")]
    pub shell: String,
    pub source: String,
    #[serde(default)]
    pub level: CriticalLevel,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ScriptProcess {
    pub fn new(source: impl Into<String>) -> Self {
        ScriptProcess {
            shell: default_shell(),
            source: source.into(),
            level: CriticalLevel::default(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_level(mut self, level: CriticalLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Writes the body to a temp file and runs it with [`ScriptProcess::shell`].
    ///
    /// The file is removed once the shell exits.
    pub async fn exec<O, E>(
        &self,
        cancel: &CancellationToken,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<(), ProcessError>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let dir = script_dir();
        let mut file = tempfile::Builder::new()
            .prefix("proc-shell")
            .tempfile_in(&dir)
            .map_err(ProcessError::Script)?;
        file.write_all(self.source.as_bytes())
            .and_then(|_| file.flush())
            .map_err(ProcessError::Script)?;
        let path = file.into_temp_path();
        debug!("[process] Script written to {}", path.display());

        let label = format!("{} {}", self.shell, path.display());
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg(&*path).envs(&self.env);

        supervise(&label, cmd, self.level, cancel, stdout, stderr).await
    }
}

/// Scripts executed one after another, stopping at the first failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncScripts {
    pub scripts: Vec<ScriptProcess>,
}

impl SyncScripts {
    pub fn new(scripts: Vec<ScriptProcess>) -> Self {
        SyncScripts { scripts }
    }

    pub async fn exec<O, E>(
        &self,
        cancel: &CancellationToken,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<(), ProcessError>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        for script in &self.scripts {
            script.exec(cancel, stdout, stderr).await?;
        }
        Ok(())
    }
}

fn script_dir() -> PathBuf {
    match std::env::var_os(SCRIPT_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir(),
    }
}
