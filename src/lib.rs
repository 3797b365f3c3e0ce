//! kitup - editor toolchain setup assistant
//!
//! Library crate with the install pipeline and task engine, shared with the CLI.

#[macro_use]
pub mod paths;

pub mod archive;
pub mod checksum;
pub mod config;
pub mod download;
pub mod env_path;
pub mod error;
pub mod github;
pub mod http;
pub mod installers;
pub mod logging;
pub mod platform;
pub mod retry;
pub mod status;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;
