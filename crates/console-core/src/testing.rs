// SPDX-License-Identifier: GPL-3.0

//! Test utilities shared across the crate: deterministic block builders, a
//! scripted mock chain client and feed handles for driving the push channels
//! by hand.

use crate::{
	client::{BlockFeed, BlockHeader, BlockRef, ChainClient, ChainStreams, PinEvent, StorageDiff},
	error::ClientError,
	lock,
};
use async_trait::async_trait;
use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex,
	},
};
use subxt::config::substrate::H256;
use tokio::sync::{mpsc, watch};

/// Deterministic 32-byte hash from a small integer.
pub fn hash(n: u64) -> H256 {
	H256::from_low_u64_be(n)
}

/// A block reference with a hash derived from `(number, tag)`.
///
/// The parent always points at the canonical block (tag 1) one height below,
/// so siblings built with different tags share a parent.
pub fn block_ref(number: u32, tag: u64) -> BlockRef {
	BlockRef {
		hash: hash(((number as u64) << 16) | tag),
		parent: hash(((number as u64).saturating_sub(1) << 16) | 1),
		number,
	}
}

/// The canonical chain between two heights, inclusive.
pub fn chain(from: u32, to: u32) -> Vec<BlockRef> {
	(from..=to).map(|n| block_ref(n, 1)).collect()
}

/// The sender side of a [`ChainStreams`] bundle, kept by the test to drive
/// the channels by hand.
pub struct FeedHandle {
	/// Pin/unpin event injector.
	pub pins: mpsc::UnboundedSender<PinEvent>,
	/// Best-chain list injector (root-to-tip, first element finalized).
	pub best: watch::Sender<Vec<BlockRef>>,
	/// Finalized-block injector.
	pub finalized: watch::Sender<Option<BlockRef>>,
}

impl FeedHandle {
	/// A [`BlockFeed`] view over the same channels.
	pub fn block_feed(&self) -> BlockFeed {
		BlockFeed { finalized: self.finalized.subscribe(), best: self.best.subscribe() }
	}
}

/// Build a connected feed-handle/stream pair.
pub fn chain_streams() -> (FeedHandle, ChainStreams) {
	let (pins_tx, pins_rx) = mpsc::unbounded_channel();
	let (best_tx, best_rx) = watch::channel(Vec::new());
	let (finalized_tx, finalized_rx) = watch::channel(None);
	(
		FeedHandle { pins: pins_tx, best: best_tx, finalized: finalized_tx },
		ChainStreams { pins: pins_rx, best: best_rx, finalized: finalized_rx },
	)
}

/// A scripted in-memory [`ChainClient`].
///
/// Blocks registered via [`add_block`](Self::add_block) get a synthetic
/// header, a one-extrinsic body and empty events; individual calls can be
/// made to fail to exercise degraded paths.
#[derive(Default)]
pub struct MockChainClient {
	headers: Mutex<HashMap<H256, BlockHeader>>,
	bodies: Mutex<HashMap<H256, Vec<String>>>,
	events: Mutex<HashMap<H256, Vec<scale_value::Value>>>,
	heights: Mutex<HashMap<u32, H256>>,
	rpc: Mutex<HashMap<String, serde_json::Value>>,
	diffs: Mutex<HashMap<H256, StorageDiff>>,
	header_fetches: AtomicUsize,
	fail_bodies: AtomicBool,
}

impl MockChainClient {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Register a block with synthetic contents.
	pub fn add_block(&self, block: BlockRef) {
		lock(&self.headers).insert(
			block.hash,
			BlockHeader {
				parent_hash: block.parent,
				number: block.number,
				state_root: H256::zero(),
				extrinsics_root: H256::zero(),
				digests: Vec::new(),
			},
		);
		lock(&self.bodies).insert(block.hash, vec!["0x00".to_string()]);
		lock(&self.events).insert(block.hash, Vec::new());
		lock(&self.heights).insert(block.number, block.hash);
	}

	/// Script a raw RPC response for a method name.
	pub fn set_rpc_response(&self, method: &str, value: serde_json::Value) {
		lock(&self.rpc).insert(method.to_string(), value);
	}

	/// Script a storage diff reported for a block.
	pub fn set_diff(&self, hash: H256, diff: StorageDiff) {
		lock(&self.diffs).insert(hash, diff);
	}

	/// Make all subsequent body fetches fail.
	pub fn fail_bodies(&self) {
		self.fail_bodies.store(true, Ordering::SeqCst);
	}

	/// Number of header fetches performed so far.
	pub fn header_fetches(&self) -> usize {
		self.header_fetches.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ChainClient for MockChainClient {
	async fn block_header(&self, hash: H256) -> Result<BlockHeader, ClientError> {
		self.header_fetches.fetch_add(1, Ordering::SeqCst);
		lock(&self.headers).get(&hash).cloned().ok_or_else(|| unknown("block_header"))
	}

	async fn block_body(&self, hash: H256) -> Result<Vec<String>, ClientError> {
		if self.fail_bodies.load(Ordering::SeqCst) {
			return Err(unknown("block_body"));
		}
		lock(&self.bodies).get(&hash).cloned().ok_or_else(|| unknown("block_body"))
	}

	async fn system_events(&self, hash: H256) -> Result<Vec<scale_value::Value>, ClientError> {
		lock(&self.events).get(&hash).cloned().ok_or_else(|| unknown("system_events"))
	}

	async fn raw_rpc(
		&self,
		method: &str,
		_params: serde_json::Value,
	) -> Result<serde_json::Value, ClientError> {
		lock(&self.rpc).get(method).cloned().ok_or_else(|| unknown(method))
	}

	async fn block_hash_at(&self, height: u32) -> Result<Option<H256>, ClientError> {
		Ok(lock(&self.heights).get(&height).copied())
	}

	async fn storage_diff(
		&self,
		_parent: H256,
		hash: H256,
	) -> Result<Option<StorageDiff>, ClientError> {
		Ok(lock(&self.diffs).get(&hash).cloned())
	}
}

fn unknown(method: &str) -> ClientError {
	ClientError::RequestFailed { method: method.to_string(), message: "unknown block".to_string() }
}
