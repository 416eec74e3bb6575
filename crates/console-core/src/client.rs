// SPDX-License-Identifier: GPL-3.0

//! Narrow interface over the chain-client collaborator.
//!
//! The console core does not speak to nodes directly; it consumes a
//! pre-existing chain client (subxt/smoldot/fork overlay) through the
//! [`ChainClient`] trait and the three push channels bundled in
//! [`ChainStreams`]. Everything the ledger and the subscription registry need
//! from the outside world goes through here, which keeps the core testable
//! against the mock client in [`crate::testing`].
//!
//! # Design Decision: Why a trait and not the client library's own types
//!
//! A focused API surface, ergonomic error handling via [`ClientError`], and
//! insulation from collaborator API churn. The tradeoff is maintaining this
//! thin layer.

use crate::error::ClientError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use subxt::config::substrate::H256;
use tokio::sync::{mpsc, watch};

/// A lightweight reference to a block, as reported by the pinned-block
/// stream: `{hash, parent, number}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
	/// The block hash.
	pub hash: H256,
	/// The parent block hash.
	pub parent: H256,
	/// The block number (height).
	pub number: u32,
}

/// Pin lifecycle events reported by the chain client.
#[derive(Debug, Clone)]
pub enum PinEvent {
	/// A new block entered the client's pinning window.
	Pinned(BlockRef),
	/// A block left the pinning window.
	Unpinned(H256),
}

/// A single digest log of a block header.
///
/// Chain-defined digest variants are modelled as a closed enum; anything the
/// client could not recognize is kept verbatim as [`DigestItem::Other`]
/// rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestItem {
	/// A pre-runtime digest (e.g. the slot claim).
	PreRuntime {
		/// Four-character consensus engine id.
		engine: String,
		/// Hex-encoded payload.
		payload: String,
	},
	/// A consensus digest.
	Consensus {
		/// Four-character consensus engine id.
		engine: String,
		/// Hex-encoded payload.
		payload: String,
	},
	/// A seal placed by the block author.
	Seal {
		/// Four-character consensus engine id.
		engine: String,
		/// Hex-encoded payload.
		payload: String,
	},
	/// The runtime environment was updated in this block.
	RuntimeEnvironmentUpdated,
	/// An unrecognized digest, kept as raw hex.
	Other {
		/// The raw, hex-encoded digest log.
		raw: String,
	},
}

/// A decoded block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
	/// The parent block hash.
	pub parent_hash: H256,
	/// The block number (height).
	pub number: u32,
	/// The state trie root.
	pub state_root: H256,
	/// The extrinsics trie root.
	pub extrinsics_root: H256,
	/// The digest logs.
	pub digests: Vec<DigestItem>,
}

/// A storage diff between a block and its parent: storage key (hex) to
/// `[old, new]` hex value pair.
pub type StorageDiff = BTreeMap<String, (Option<String>, Option<String>)>;

/// A dynamically decoded value together with its runtime type and content
/// fingerprint.
///
/// The fingerprint is the hex of the value's re-encoded bytes when
/// re-encoding succeeded. Two values with equal fingerprints are the same
/// content observed at different blocks; a `None` fingerprint makes the
/// value compare as unique.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
	/// The runtime type id of the value.
	pub type_id: u32,
	/// The decoded value.
	pub value: scale_value::Value,
	/// Hex of the re-encoded bytes, when re-encoding succeeded.
	pub fingerprint: Option<String>,
}

/// The narrow chain-client interface the core relies on.
///
/// All methods are point queries at a specific block hash; the push side
/// (pins, best chain, finalized block) arrives through [`ChainStreams`].
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Get the decoded header of a block.
	async fn block_header(&self, hash: H256) -> Result<BlockHeader, ClientError>;

	/// Get the block body as hex-encoded extrinsics.
	async fn block_body(&self, hash: H256) -> Result<Vec<String>, ClientError>;

	/// Get the decoded system events at a block.
	async fn system_events(&self, hash: H256) -> Result<Vec<scale_value::Value>, ClientError>;

	/// Perform an arbitrary low-level RPC call by method name and positional
	/// params.
	async fn raw_rpc(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, ClientError>;

	/// Resolve a height to a block hash through chain state
	/// (`System.BlockHash`), used when the archive RPC is unavailable.
	async fn block_hash_at(&self, height: u32) -> Result<Option<H256>, ClientError>;

	/// Raw storage diff between a block and its parent.
	///
	/// Only available when a local fork/sandbox overlay is active; clients
	/// without the capability return `Ok(None)`.
	async fn storage_diff(
		&self,
		parent: H256,
		hash: H256,
	) -> Result<Option<StorageDiff>, ClientError>;
}

/// The push channels of a single chain connection.
///
/// A connection produces exactly one `ChainStreams`; a chain switch tears the
/// senders down, which every consumer treats as a hard reset.
pub struct ChainStreams {
	/// Pin/unpin lifecycle events.
	pub pins: mpsc::UnboundedReceiver<PinEvent>,
	/// The current best chain, ordered root-to-tip. The first element is the
	/// latest finalized block, the last is the best tip.
	pub best: watch::Receiver<Vec<BlockRef>>,
	/// The current finalized block.
	pub finalized: watch::Receiver<Option<BlockRef>>,
}

/// The subset of [`ChainStreams`] the subscription registry consumes.
#[derive(Clone)]
pub struct BlockFeed {
	/// The current finalized block.
	pub finalized: watch::Receiver<Option<BlockRef>>,
	/// The current best chain, ordered root-to-tip (first element finalized).
	pub best: watch::Receiver<Vec<BlockRef>>,
}
