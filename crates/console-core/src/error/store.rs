// SPDX-License-Identifier: GPL-3.0

//! Persistent store error types.

use thiserror::Error;

/// Errors that can occur when interacting with the console store.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Database error.
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),
	/// IO error.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Data corruption detected in a stored entry.
	#[error("Data corruption: {0}")]
	DataCorruption(String),
}
