//! Versioned agent workspaces.
//!
//! A workspace is a directory mutated by an external code-generation tool and
//! advanced through commit-addressed snapshots. The crate is layered:
//!
//! - **[`core`]**: pure values (state documents, version records, semantic
//!   version bumps). No I/O.
//! - **[`io`]**: side-effecting adapters (configuration, layout, git,
//!   subprocesses, the code-generation collaborator, atomic file writes).
//! - **[`state_store`]**, **[`registry`]**: the two durable stores, the
//!   per-workspace OCC state slots and the commit-to-version registry.
//! - **[`architect`]**: the lifecycle controller that bootstraps workspaces
//!   and promotes feedback rounds to new commit-addressed directories.
//! - **[`gateway`]**: endpoint resolution for the reverse proxy.

pub mod architect;
pub mod core;
pub mod error;
pub mod gateway;
pub mod io;
pub mod locks;
pub mod logging;
pub mod registry;
pub mod state_store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{Error, Result};
