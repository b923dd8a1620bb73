use std::collections::BTreeMap;
use std::process::Stdio;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error_handling::types::ProcessError;
use crate::process::types::CriticalLevel;

/// A single external command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub level: CriticalLevel,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Command {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
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

    /// Human readable form used in logs and errors.
    pub fn label(&self) -> String {
        if self.args.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.args.join(" "))
        }
    }

    /// Runs the command, copying its stdout/stderr into the given sinks.
    ///
    /// Returns once the child has exited. If `cancel` fires first the
    /// child is killed and [`ProcessError::Cancelled`] is returned.
    pub async fn run<O, E>(
        &self,
        cancel: &CancellationToken,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<(), ProcessError>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let mut cmd = tokio::process::Command::new(&self.name);
        cmd.args(&self.args).envs(&self.env);
        supervise(&self.label(), cmd, self.level, cancel, stdout, stderr).await
    }
}

/// Commands executed one after another, stopping at the first failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncProcess {
    pub commands: Vec<Command>,
}

impl SyncProcess {
    pub fn new(commands: Vec<Command>) -> Self {
        SyncProcess { commands }
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
        for command in &self.commands {
            command.run(cancel, stdout, stderr).await?;
        }
        Ok(())
    }
}

/// Spawns `cmd`, pumps its output and waits for it under `cancel`.
pub(crate) async fn supervise<O, E>(
    label: &str,
    mut cmd: tokio::process::Command,
    level: CriticalLevel,
    cancel: &CancellationToken,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<(), ProcessError>
where
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled(label.to_string()));
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        error!("[process] Failed to start {}: {}", label, e);
        ProcessError::Start(label.to_string(), e)
    })?;
    debug!("[process] Started {} (pid {:?})", label, child.id());

    let mut child_out = child.stdout.take();
    let mut child_err = child.stderr.take();

    let outcome = tokio::select! {
        res = async {
            let pump_out = async {
                match child_out.as_mut() {
                    Some(pipe) => tokio::io::copy(pipe, stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let pump_err = async {
                match child_err.as_mut() {
                    Some(pipe) => tokio::io::copy(pipe, stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let (out_res, err_res) = tokio::join!(pump_out, pump_err);
            if let Err(e) = out_res.and(err_res) {
                warn!("[process] Output of {} truncated: {}", label, e);
            }
            child.wait().await
        } => Some(res),
        _ = cancel.cancelled() => None,
    };

    let status = match outcome {
        Some(Ok(status)) => status,
        Some(Err(e)) => {
            error!("[process] Failed waiting for {}: {}", label, e);
            return Err(ProcessError::Wait(label.to_string(), e));
        }
        None => {
            if let Err(e) = child.kill().await {
                warn!("[process] Failed to kill {}: {}", label, e);
            }
            warn!("[process] {} killed on cancellation", label);
            return Err(ProcessError::Cancelled(label.to_string()));
        }
    };

    if status.success() {
        debug!("[process] {} finished", label);
        return Ok(());
    }

    if level.escalates_exit_status() {
        error!("[process] {} exited with {}", label, status);
        Err(ProcessError::ExitStatus(label.to_string(), status.to_string()))
    } else {
        if level.is_verbose() {
            warn!("[process] {} exited with {}", label, status);
        } else {
            debug!("[process] {} exited with {}", label, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn echo_output_is_captured() {
        init_logger();
        let cancel = CancellationToken::new();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        Command::new("echo", ["New Login"])
            .run(&cancel, &mut out, &mut err)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "New Login\n");
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn env_is_passed_to_child() {
        let cancel = CancellationToken::new();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        Command::new("sh", ["-c", "printf %s \"$MIEL_CONTAINER_NAME\""])
            .with_env("MIEL_CONTAINER_NAME", "honeypot-10.0.0.1")
            .run(&cancel, &mut out, &mut err)
            .await
            .unwrap();

        assert_eq!(out, b"honeypot-10.0.0.1");
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let cancel = CancellationToken::new();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let res = Command::new("/nonexistent/definitely-not-here", Vec::<String>::new())
            .run(&cancel, &mut out, &mut err)
            .await;

        assert!(matches!(res, Err(ProcessError::Start(_, _))));
    }

    #[tokio::test]
    async fn exit_status_only_fails_at_red_alert() {
        let cancel = CancellationToken::new();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let normal = Command::new("false", Vec::<String>::new());
        assert!(normal.run(&cancel, &mut out, &mut err).await.is_ok());

        let warning = normal.clone().with_level(CriticalLevel::Warning);
        assert!(warning.run(&cancel, &mut out, &mut err).await.is_ok());

        let red = normal.with_level(CriticalLevel::RedAlert);
        let res = red.run(&cancel, &mut out, &mut err).await;
        assert!(matches!(res, Err(ProcessError::ExitStatus(_, _))));
    }

    #[tokio::test]
    async fn cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let started = Instant::now();
        let res = Command::new("sleep", ["10"])
            .run(&cancel, &mut out, &mut err)
            .await;

        assert!(matches!(res, Err(ProcessError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_cancelled_token_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let res = Command::new("echo", ["hi"]).run(&cancel, &mut out, &mut err).await;

        assert!(matches!(res, Err(ProcessError::Cancelled(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn sync_process_stops_at_first_failure() {
        let cancel = CancellationToken::new();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let batch = SyncProcess::new(vec![
            Command::new("echo", ["one"]),
            Command::new("false", Vec::<String>::new()).with_level(CriticalLevel::RedAlert),
            Command::new("echo", ["two"]),
        ]);

        let res = batch.exec(&cancel, &mut out, &mut err).await;
        assert!(res.is_err());
        assert_eq!(String::from_utf8(out).unwrap(), "one\n");
    }
}
