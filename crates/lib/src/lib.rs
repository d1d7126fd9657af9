// The internals docs are built with --document-private-items, so allow
// linking to private items from module documentation.
#![allow(rustdoc::private_intra_doc_links)]

//! # UEFI boot entry editor
//!
//! This crate shows and edits firmware boot entries by running
//! `efibootmgr` and parsing what it prints. The `efibootctl` binary
//! (`crates/cli`) is a thin wrapper that delegates to [`cli::run_from_iter`].
//!
//! Defaults such as the `efibootmgr` binary, a privilege helper and the
//! ESP location are read from `/etc/efibootctl/config.toml`, or the file
//! given with `--config`; see [`config`].
//!
//! The API is internal and not stable for external consumption.
//!
//! # Module Index
//!
//! - [`cli`] - Command-line interface implementation (clap-based)
//! - [`entry`] - Core types: [`entry::BootEntry`], [`entry::Listing`], [`entry::BootNum`]
//! - [`parser`] - Parsing `efibootmgr -v` output
//! - [`manager`] - The [`manager::BootManager`] interface and its `efibootmgr` backend
//! - [`session`] - Staging edits and committing them as [`manager::Operation`]s
//! - [`config`] - The TOML configuration file
//! - [`error`] - Error types
//!
//! # Related Crates
//!
//! - [`efiboot-internal-blockdev`](../efiboot_internal_blockdev/index.html) - ESP detection
//! - [`efiboot-internal-utils`](../efiboot_internal_utils/index.html) - Subprocess helpers

pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
#[cfg(test)]
mod fake;
pub mod manager;
pub mod parser;
pub mod session;
