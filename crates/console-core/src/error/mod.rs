// SPDX-License-Identifier: GPL-3.0

//! Error types for the console core.
//!
//! This module contains all error types used throughout the `console-core`
//! crate, organized by context:
//!
//! - [`client::ClientError`] - Errors from the chain-client collaborator.
//! - [`ledger::LedgerError`] - Errors from block ledger operations.
//! - [`sandbox::SandboxError`] - Errors from script execution.
//! - [`store::StoreError`] - Errors from the persistent key-value store.

pub mod client;
pub mod ledger;
pub mod sandbox;
pub mod store;

pub use client::ClientError;
pub use ledger::LedgerError;
pub use sandbox::SandboxError;
pub use store::StoreError;
