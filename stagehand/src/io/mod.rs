//! Side-effecting adapters: configuration, filesystem layout, git, processes.

pub mod atomic;
pub mod config;
pub mod generator;
pub mod git;
pub mod layout;
pub mod metadata;
pub mod process;
