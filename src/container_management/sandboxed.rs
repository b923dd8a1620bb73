//! Sandboxed backend: isolated environments driven by external commands.
//!
//! Provisioning, freezing, unfreezing and teardown are each a list of
//! [`Command`]s followed by a list of [`ScriptProcess`]es. Every one of them
//! receives `MIEL_CONTAINER_NAME` and `MIEL_REMOTE_HOST` in its environment so
//! one configuration can serve every attacker.
//!
//! ```toml
//! [directors.ssh]
//! kind = "sandboxed"
//! template = "ssh-{host}"
//! service_addr = "{name}.sandbox.local:22"
//! freeze_after_secs = 300
//! provision_timeout_ms = 120000
//! commands = [{ name = "lxc-start", args = ["-n", "ssh-base"], level = "red_alert" }]
//! freeze_commands = [{ name = "sh", args = ["-c", "lxc-freeze -n $MIEL_CONTAINER_NAME"] }]
//! unfreeze_commands = [{ name = "sh", args = ["-c", "lxc-unfreeze -n $MIEL_CONTAINER_NAME"] }]
//! ```

use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::container_management::backend::BackendSpec;
use crate::container_management::director::Director;
use crate::container_management::registry::DirectorOptions;
use crate::error_handling::types::{DirectorError, ProcessError};
use crate::network::backend_conn::BackendConn;
use crate::process::{Command, ScriptProcess, SyncProcess, SyncScripts};

pub const CONTAINER_NAME_ENV: &str = "MIEL_CONTAINER_NAME";
pub const REMOTE_HOST_ENV: &str = "MIEL_REMOTE_HOST";

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_provision_timeout_ms() -> u64 {
    60_000
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    200
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SandboxOptions {
    /// Address of the service inside the sandbox. `{name}` and `{host}` are
    /// replaced by the container name and the attacker host.
    pub service_addr: String,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub scripts: Vec<ScriptProcess>,
    #[serde(default)]
    pub teardown_commands: Vec<Command>,
    #[serde(default)]
    pub teardown_scripts: Vec<ScriptProcess>,
    #[serde(default)]
    pub freeze_commands: Vec<Command>,
    #[serde(default)]
    pub unfreeze_commands: Vec<Command>,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Upper bound for the whole provisioning phase.
    #[serde(default = "default_provision_timeout_ms")]
    pub provision_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Idle time before the housekeeper freezes the sandbox, `0` never freezes.
    #[serde(default)]
    pub freeze_after_secs: u64,
}

impl SandboxOptions {
    pub fn new(service_addr: impl Into<String>) -> Self {
        SandboxOptions {
            service_addr: service_addr.into(),
            commands: Vec::new(),
            scripts: Vec::new(),
            teardown_commands: Vec::new(),
            teardown_scripts: Vec::new(),
            freeze_commands: Vec::new(),
            unfreeze_commands: Vec::new(),
            dial_timeout_ms: default_dial_timeout_ms(),
            provision_timeout_ms: default_provision_timeout_ms(),
            connect_retries: default_connect_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            freeze_after_secs: 0,
        }
    }
}

/// One sandbox, bound to a container name and an attacker host.
#[derive(Debug, Clone)]
pub struct SandboxedBackend {
    options: SandboxOptions,
    name: String,
    host: String,
}

impl SandboxedBackend {
    pub fn new(options: SandboxOptions, name: &str, host: &str) -> Self {
        SandboxedBackend {
            options,
            name: name.to_string(),
            host: host.to_string(),
        }
    }

    pub fn address(&self) -> String {
        self.options
            .service_addr
            .replace("{name}", &self.name)
            .replace("{host}", &self.host)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.options.dial_timeout_ms)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.options.provision_timeout_ms)
    }

    pub fn idle_threshold(&self) -> Option<Duration> {
        match self.options.freeze_after_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub async fn provision(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        self.run_phase("provision", &self.options.commands, &self.options.scripts, cancel)
            .await
            .map_err(DirectorError::from)
    }

    pub async fn freeze(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        self.run_phase("freeze", &self.options.freeze_commands, &[], cancel)
            .await
            .map_err(DirectorError::from)
    }

    pub async fn unfreeze(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        self.run_phase("unfreeze", &self.options.unfreeze_commands, &[], cancel)
            .await
            .map_err(DirectorError::from)
    }

    pub async fn teardown(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        self.run_phase(
            "teardown",
            &self.options.teardown_commands,
            &self.options.teardown_scripts,
            cancel,
        )
        .await
        .map_err(DirectorError::from)
    }

    /// Connects to the sandboxed service, retrying while it boots.
    pub async fn connect(&self) -> Result<BackendConn, DirectorError> {
        let target = self.address();
        let max_retries = self.options.connect_retries;
        let mut retries = 0;

        loop {
            match TcpStream::connect(&target).await {
                Ok(stream) => {
                    info!("[{}] Connected to sandbox service on {}", self.name, target);
                    return Ok(BackendConn::Tcp(stream));
                }
                Err(e) if retries < max_retries => {
                    retries += 1;
                    // Progressive backoff, cap at 3s
                    let wait_time = std::cmp::min(self.options.retry_delay_ms + u64::from(retries) * 200, 3000);
                    debug!(
                        "[{}] Connection attempt {}/{} to {} failed: {} - retrying in {}ms",
                        self.name, retries, max_retries, target, e, wait_time
                    );
                    tokio::time::sleep(Duration::from_millis(wait_time)).await;
                }
                Err(e) => {
                    return Err(DirectorError::ConnectionFailed(format!(
                        "{} at {} after {} attempts: {}",
                        self.name,
                        target,
                        retries + 1,
                        e
                    )))
                }
            }
        }
    }

    async fn run_phase(
        &self,
        phase: &str,
        commands: &[Command],
        scripts: &[ScriptProcess],
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        if commands.is_empty() && scripts.is_empty() {
            return Ok(());
        }
        debug!("[{}] Running {} ({} commands, {} scripts)", self.name, phase, commands.len(), scripts.len());

        let commands = SyncProcess::new(
            commands
                .iter()
                .cloned()
                .map(|c| {
                    c.with_env(CONTAINER_NAME_ENV, &self.name)
                        .with_env(REMOTE_HOST_ENV, &self.host)
                })
                .collect(),
        );
        let scripts = SyncScripts::new(
            scripts
                .iter()
                .cloned()
                .map(|s| {
                    s.with_env(CONTAINER_NAME_ENV, &self.name)
                        .with_env(REMOTE_HOST_ENV, &self.host)
                })
                .collect(),
        );

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut result = commands.exec(cancel, &mut stdout, &mut stderr).await;
        if result.is_ok() {
            result = scripts.exec(cancel, &mut stdout, &mut stderr).await;
        }

        for line in String::from_utf8_lossy(&stdout).lines() {
            debug!("[sandbox:{}][{}][stdout] {}", self.name, phase, line);
        }
        for line in String::from_utf8_lossy(&stderr).lines() {
            debug!("[sandbox:{}][{}][stderr] {}", self.name, phase, line);
        }

        if let Err(e) = &result {
            warn!("[{}] {} failed: {}", self.name, phase, e);
        }
        result
    }
}

/// Constructor registered under `"sandboxed"`.
pub fn new_director(options: DirectorOptions) -> Result<Director, DirectorError> {
    let sandbox: SandboxOptions = options.decode()?;
    Director::from_options(options, BackendSpec::Sandboxed(sandbox))
}
