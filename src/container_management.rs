//! Container management subsystem.
//!
//! A [`Director`] maps each attacking host to one [`Container`] of its backend
//! kind, creating it on first sight. Backends form a closed set
//! ([`BackendSpec`]): forwarding, sandboxed, pass-through and stub. Directors
//! are built from configuration through a [`DirectorRegistry`].
//!
//! Re-exports:
//! - [`Director`]: get-or-create, lookup, listing and removal of containers.
//! - [`DirectorRegistry`], [`DirectorOptions`]: kind name to constructor table.
//! - [`Container`], [`ContainerDetail`], [`ContainerStats`], [`ContainerState`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! use std::sync::Arc;
//! use mieltrap::container_management::{DirectorOptions, DirectorRegistry};
//! use mieltrap::event::LogChannel;
//!
//! let registry = DirectorRegistry::with_builtin();
//! let options = DirectorOptions::new("stub", "vm-stub", "miel", Arc::new(LogChannel));
//! let director = registry.build(options)?;
//! let container = director.new_or_get_container("10.0.0.1").await?;
//! println!("{}", container.name());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod container;
pub mod director;
pub mod forward;
pub mod namer;
pub mod passthrough;
pub mod registry;
pub mod sandboxed;
pub mod stub;
#[cfg(test)]
pub mod tests;
pub mod types;

pub use backend::{Backend, BackendSpec};
pub use container::{AttachGuard, Container};
pub use director::Director;
pub use namer::Namer;
pub use registry::{DirectorConstructor, DirectorOptions, DirectorRegistry};
pub use types::{ContainerDetail, ContainerState, ContainerStats};
