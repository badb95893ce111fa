//! CLI command implementations.

pub mod config;
pub mod init;
pub mod install;
pub mod repo;
pub mod sync;
