//! Process executor used by backends to provision and tear down sandboxes.
//!
//! Every command runs under a [`tokio_util::sync::CancellationToken`]: if the
//! token fires before the child exits, the child is killed and the call fails
//! with [`ProcessError::Cancelled`](crate::error_handling::types::ProcessError).
//!
//! Re-exports:
//! - [`Command`] / [`SyncProcess`]: a single external command, or a list run in order.
//! - [`ScriptProcess`] / [`SyncScripts`]: a script body executed through a shell.
//! - [`CriticalLevel`]: how a non-zero exit status is treated.
//!
//! Example (non-running):
//! ```ignore
//! use mieltrap::process::Command;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (mut out, mut err) = (Vec::new(), Vec::new());
//! Command::new("echo", ["New Login"]).run(&cancel, &mut out, &mut err).await?;
//! assert_eq!(out, b"New Login\n");
//! ```

pub mod command;
pub mod script;
pub mod types;

pub use command::{Command, SyncProcess};
pub use script::{ScriptProcess, SyncScripts};
pub use types::CriticalLevel;
