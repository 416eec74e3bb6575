// SPDX-License-Identifier: GPL-3.0

//! Block ledger error types.

use crate::error::ClientError;
use subxt::config::substrate::H256;
use thiserror::Error;

/// Errors that can occur when working with the block ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// Chain client error while resolving or fetching block data.
	#[error("Client error: {0}")]
	Client(#[from] ClientError),

	/// Block not found at the specified hash.
	#[error("Block not found: {0:?}")]
	BlockHashNotFound(H256),

	/// Block not found at the specified height.
	#[error("Block not found at height {0}")]
	BlockNumberNotFound(u32),

	/// The given block identifier is neither a hash nor a height.
	#[error("Invalid block identifier: {0}")]
	InvalidBlockId(String),
}
