//! # archsync
//!
//! Client, CLI and development server for the archsync reconciliation
//! engine (`archsync_core`).
//!
//! - [`client`] - `EnvironmentBackend` over the version-store REST API
//! - [`api`] - axum development server implementing that API in memory
//! - [`cli`] - clap commands driving an `EnvironmentStore`
//! - [`config`] - `archsync.toml` plus environment overrides

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
