// SPDX-License-Identifier: GPL-3.0

//! String constants for raw RPC access.

/// JSON-RPC method names used by the block ledger's fallback paths.
///
/// These match the actual RPC method names in the Polkadot SDK JSON-RPC
/// specification.
pub mod methods {
	/// Look up block hashes by height (archive RPC spec).
	pub const ARCHIVE_V1_HASH_BY_HEIGHT: &str = "archive_v1_hashByHeight";
	/// Fetch a full block (header + extrinsics) by hash (legacy RPC).
	pub const CHAIN_GET_BLOCK: &str = "chain_getBlock";
}
