//! `retailiq` command-line front end
//!
//! The binary loads a [`RuntimeConfig`], applies flag overrides, installs
//! tracing and dispatches one [`commands::Command`].

pub mod commands;
mod init;

pub use init::{apply_cli_overrides, init_tracing};
pub use retailiq_config::RuntimeConfig;
