// SPDX-License-Identifier: GPL-3.0

//! Block ledger: a consistent, query-able view of recently seen blocks.
//!
//! The ledger consumes the chain client's pin/unpin stream and maintains, per
//! block hash, a [`BlockRecord`] carrying the fetched header/body/events and
//! the block's current [`BlockStatus`]. Records are published through `watch`
//! channels, so consumers always observe a complete snapshot and keep their
//! final snapshot even after the ledger evicts the block.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         BlockLedger                             │
//! │                                                                 │
//! │   pins ──► track(hash)  ─┬─► fetch task (header/body/events)    │
//! │                          ├─► status task (best-chain driven)    │
//! │                          └─► TTL task (1h or chain switch)      │
//! │                                                                 │
//! │   state: hash → watch<BlockRecord>, height → {hash}, transient  │
//! │   finalized stream ──► finalized-height cache                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::{
	client::{BlockHeader, BlockRef, ChainClient, ChainStreams, DigestItem, PinEvent},
	error::{ClientError, LedgerError},
	lock,
	strings::rpc::methods,
};
use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{Arc, Mutex},
	time::Duration,
};
use subxt::config::substrate::H256;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long a tracked block is retained before it is evicted.
const BLOCK_TTL: Duration = Duration::from_secs(60 * 60);

/// Finality status of a block.
///
/// A status only ever moves forward: `Unknown → Best → Finalized` or
/// `Unknown → Fork → Pruned`. `Finalized` and `Pruned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
	/// Not on the current best chain and not finalized.
	Fork,
	/// On the currently favored, not-yet-finalized chain.
	Best,
	/// Irrevocably committed by consensus.
	Finalized,
	/// At or below a finalized height, lost to the finalized competitor.
	Pruned,
	/// Not yet classified.
	Unknown,
}

impl BlockStatus {
	/// Ordering rank used to break ties when listing sibling blocks.
	pub fn rank(self) -> i8 {
		match self {
			Self::Finalized => 3,
			Self::Best => 2,
			Self::Fork => 1,
			Self::Unknown => 0,
			Self::Pruned => -1,
		}
	}

	/// Terminal states do not change afterwards.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Finalized | Self::Pruned)
	}
}

/// Everything the ledger knows about a single block.
///
/// `header`, `body`, `events` and `diff` are fetched independently and each
/// degrades to `None` on failure.
#[derive(Debug, Clone)]
pub struct BlockRecord {
	/// The block hash.
	pub hash: H256,
	/// The parent block hash.
	pub parent: H256,
	/// The block number (height).
	pub number: u32,
	/// The block's current finality status.
	pub status: BlockStatus,
	/// The decoded header, if fetched.
	pub header: Option<BlockHeader>,
	/// The hex-encoded extrinsics, if fetched.
	pub body: Option<Vec<String>>,
	/// The decoded system events, if fetched.
	pub events: Option<Vec<scale_value::Value>>,
	/// Storage diff against the parent, when a fork overlay is active.
	pub diff: Option<crate::client::StorageDiff>,
}

impl BlockRecord {
	fn new(block: BlockRef) -> Self {
		Self {
			hash: block.hash,
			parent: block.parent,
			number: block.number,
			status: BlockStatus::Unknown,
			header: None,
			body: None,
			events: None,
			diff: None,
		}
	}
}

#[derive(Default)]
struct LedgerState {
	/// Tracked blocks, each behind a watch channel.
	blocks: HashMap<H256, watch::Sender<BlockRecord>>,
	/// Height index over tracked blocks only.
	by_height: BTreeMap<u32, HashSet<H256>>,
	/// Fallback-resolved blocks, retained without entering the height index.
	transient: HashMap<H256, BlockRecord>,
}

struct LedgerInner {
	client: Arc<dyn ChainClient>,
	best: watch::Receiver<Vec<BlockRef>>,
	state: Mutex<LedgerState>,
	/// Hash → height of blocks known to be finalized (ancestor cache).
	finalized_heights: Mutex<HashMap<H256, u32>>,
	reset: CancellationToken,
	ttl: Duration,
}

/// The block ledger.
///
/// Cheap to clone; all clones share the same state. Dropped entirely (and
/// rebuilt) on a chain switch, after [`reset`](BlockLedger::reset) tears the
/// background tasks down.
#[derive(Clone)]
pub struct BlockLedger {
	inner: Arc<LedgerInner>,
}

impl BlockLedger {
	/// Create a ledger over one chain connection and start consuming its
	/// streams.
	pub fn new(client: Arc<dyn ChainClient>, streams: ChainStreams) -> Self {
		Self::with_ttl(client, streams, BLOCK_TTL)
	}

	/// Same as [`new`](Self::new) with an explicit retention TTL.
	pub fn with_ttl(client: Arc<dyn ChainClient>, streams: ChainStreams, ttl: Duration) -> Self {
		let ChainStreams { pins, best, finalized } = streams;
		let inner = Arc::new(LedgerInner {
			client,
			best,
			state: Mutex::new(LedgerState::default()),
			finalized_heights: Mutex::new(HashMap::new()),
			reset: CancellationToken::new(),
			ttl,
		});

		// Pin lifecycle task.
		{
			let inner = inner.clone();
			tokio::spawn(async move {
				let mut pins = pins;
				loop {
					tokio::select! {
						_ = inner.reset.cancelled() => break,
						evt = pins.recv() => match evt {
							Some(PinEvent::Pinned(block)) => {
								inner.track(block);
							},
							Some(PinEvent::Unpinned(hash)) => inner.on_unpinned(hash),
							None => break,
						},
					}
				}
			});
		}

		// Finalized-height cache task.
		{
			let inner = inner.clone();
			tokio::spawn(async move {
				let mut finalized = finalized;
				finalized.mark_changed();
				loop {
					tokio::select! {
						_ = inner.reset.cancelled() => break,
						changed = finalized.changed() => {
							if changed.is_err() {
								break;
							}
						},
					}
					let block = *finalized.borrow_and_update();
					if let Some(block) = block {
						lock(&inner.finalized_heights).insert(block.hash, block.number);
					}
				}
			});
		}

		Self { inner }
	}

	/// Begin (or reuse) tracking of a block.
	///
	/// Idempotent per hash: a second call before eviction subscribes to the
	/// existing record without triggering duplicate fetches.
	pub fn track(&self, block: BlockRef) -> watch::Receiver<BlockRecord> {
		self.inner.track(block)
	}

	/// Subscribe to an already tracked block.
	pub fn tracked(&self, hash: &H256) -> Option<watch::Receiver<BlockRecord>> {
		lock(&self.inner.state).blocks.get(hash).map(|tx| tx.subscribe())
	}

	/// Snapshot of a retained block (tracked or transient).
	pub fn block(&self, hash: &H256) -> Option<BlockRecord> {
		let state = lock(&self.inner.state);
		state
			.blocks
			.get(hash)
			.map(|tx| tx.borrow().clone())
			.or_else(|| state.transient.get(hash).cloned())
	}

	/// Current status of a retained block.
	pub fn status_of(&self, hash: &H256) -> Option<BlockStatus> {
		self.block(hash).map(|record| record.status)
	}

	/// All retained blocks at `height + 1` whose parent is `hash`, ordered by
	/// status rank (finalized > best > fork > pruned), ties broken by hash.
	pub fn children_of(&self, hash: &H256) -> Vec<BlockRecord> {
		let state = lock(&self.inner.state);
		let number = state
			.blocks
			.get(hash)
			.map(|tx| tx.borrow().number)
			.or_else(|| state.transient.get(hash).map(|record| record.number));
		let Some(number) = number else {
			return Vec::new();
		};
		let child_height = number.saturating_add(1);
		let mut children: Vec<BlockRecord> = state
			.by_height
			.get(&child_height)
			.into_iter()
			.flatten()
			.filter_map(|h| state.blocks.get(h))
			.map(|tx| tx.borrow().clone())
			.chain(
				state
					.transient
					.values()
					.filter(|record| record.number == child_height)
					.cloned(),
			)
			.filter(|record| record.parent == *hash)
			.collect();
		children
			.sort_by(|a, b| b.status.rank().cmp(&a.status.rank()).then(a.hash.cmp(&b.hash)));
		children
	}

	/// Resolve a block by hash or height.
	///
	/// A retained block is returned directly. Anything else is resolved
	/// through the collaborator: heights go through the archive RPC with a
	/// `System.BlockHash` state fallback; hashes are fetched without
	/// retention guarantees (the result is kept transiently, outside the
	/// height index, until it ages out).
	pub async fn resolve(&self, id: &str) -> Result<Option<BlockRecord>, LedgerError> {
		let id = id.trim();
		// A raw or 0x-prefixed 32-byte hash is longer than any decimal height.
		if id.len() > 63 {
			let hash = parse_hash(id)?;
			if let Some(record) = self.block(&hash) {
				return Ok(Some(record));
			}
			return self.fetch_untracked(hash).await.map(Some);
		}

		let height: u32 =
			id.parse().map_err(|_| LedgerError::InvalidBlockId(id.to_string()))?;
		{
			let state = lock(&self.inner.state);
			let mut at_height: Vec<BlockRecord> = state
				.by_height
				.get(&height)
				.into_iter()
				.flatten()
				.filter_map(|h| state.blocks.get(h))
				.map(|tx| tx.borrow().clone())
				.collect();
			at_height.sort_by(|a, b| b.status.rank().cmp(&a.status.rank()));
			if let Some(record) = at_height.into_iter().next() {
				return Ok(Some(record));
			}
		}

		match self.lookup_hash_by_height(height).await? {
			Some(hash) => self.fetch_untracked(hash).await.map(Some),
			None => Err(LedgerError::BlockNumberNotFound(height)),
		}
	}

	/// Drop all retained blocks and stop the background tasks.
	///
	/// Called on a chain switch; the context builds a fresh ledger for the
	/// new connection. In-flight fetches complete but their results are
	/// discarded rather than merged into evicted records.
	pub fn reset(&self) {
		self.inner.reset.cancel();
		let mut state = lock(&self.inner.state);
		state.blocks.clear();
		state.by_height.clear();
		state.transient.clear();
		drop(state);
		lock(&self.inner.finalized_heights).clear();
	}

	async fn lookup_hash_by_height(&self, height: u32) -> Result<Option<H256>, LedgerError> {
		match self
			.inner
			.client
			.raw_rpc(methods::ARCHIVE_V1_HASH_BY_HEIGHT, serde_json::json!([height]))
			.await
		{
			Ok(value) => {
				if let Some(first) =
					value.as_array().and_then(|a| a.first()).and_then(|v| v.as_str())
				{
					return Ok(Some(parse_hash(first)?));
				}
			},
			Err(e) => log::debug!("archive hash lookup failed at height {height}: {e}"),
		}
		Ok(self.inner.client.block_hash_at(height).await?)
	}

	/// Fetch a block the client no longer pins, without retention guarantees.
	async fn fetch_untracked(&self, hash: H256) -> Result<BlockRecord, LedgerError> {
		let record = match self.inner.client.block_header(hash).await {
			Ok(header) => {
				let client = &self.inner.client;
				let (body, events) = tokio::join!(
					async {
						match client.block_body(hash).await {
							Ok(body) => Some(body),
							Err(e) => {
								log::error!("body fetch failed for {hash:?}: {e}");
								None
							},
						}
					},
					async {
						match client.system_events(hash).await {
							Ok(events) => Some(events),
							Err(e) => {
								log::error!("events fetch failed for {hash:?}: {e}");
								None
							},
						}
					},
				);
				let status = self.snapshot_status(header.number, hash, header.parent_hash);
				BlockRecord {
					hash,
					parent: header.parent_hash,
					number: header.number,
					status,
					header: Some(header),
					body,
					events,
					diff: None,
				}
			},
			Err(e) => {
				log::debug!("header fetch failed for {hash:?}, using chain_getBlock: {e}");
				self.fetch_via_raw_rpc(hash).await?
			},
		};

		// Retain the record transiently so in-flight viewers and children
		// lookups keep seeing it; it ages out under the normal TTL.
		lock(&self.inner.state).transient.insert(hash, record.clone());
		let inner = self.inner.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = inner.reset.cancelled() => {},
				_ = tokio::time::sleep(inner.ttl) => {
					lock(&inner.state).transient.remove(&hash);
				},
			}
		});

		Ok(record)
	}

	/// Last-resort resolution through the legacy `chain_getBlock` RPC.
	///
	/// Digest logs arrive as raw hex here; they are kept as
	/// [`DigestItem::Other`] instead of being dropped.
	async fn fetch_via_raw_rpc(&self, hash: H256) -> Result<BlockRecord, LedgerError> {
		let response = self
			.inner
			.client
			.raw_rpc(methods::CHAIN_GET_BLOCK, serde_json::json!([format!("{hash:?}")]))
			.await?;
		if response.is_null() {
			return Err(LedgerError::BlockHashNotFound(hash));
		}
		let block = response
			.get("block")
			.ok_or_else(|| invalid("missing `block` field"))?;
		let header = block
			.get("header")
			.ok_or_else(|| invalid("missing `header` field"))?;
		let number = header
			.get("number")
			.and_then(|v| v.as_str())
			.and_then(|v| u32::from_str_radix(v.trim_start_matches("0x"), 16).ok())
			.ok_or_else(|| invalid("invalid block number"))?;
		let parent = parse_hash(
			header
				.get("parentHash")
				.and_then(|v| v.as_str())
				.ok_or_else(|| invalid("missing parent hash"))?,
		)?;
		let state_root = header
			.get("stateRoot")
			.and_then(|v| v.as_str())
			.map(parse_hash)
			.transpose()?
			.unwrap_or_default();
		let extrinsics_root = header
			.get("extrinsicsRoot")
			.and_then(|v| v.as_str())
			.map(parse_hash)
			.transpose()?
			.unwrap_or_default();
		let digests = header
			.get("digest")
			.and_then(|d| d.get("logs"))
			.and_then(|l| l.as_array())
			.map(|logs| {
				logs.iter()
					.filter_map(|log| log.as_str())
					.map(|raw| DigestItem::Other { raw: raw.to_string() })
					.collect()
			})
			.unwrap_or_default();
		let body = block
			.get("extrinsics")
			.and_then(|e| e.as_array())
			.map(|xts| xts.iter().filter_map(|x| x.as_str().map(String::from)).collect());

		let status = self.snapshot_status(number, hash, parent);
		Ok(BlockRecord {
			hash,
			parent,
			number,
			status,
			header: Some(BlockHeader { parent_hash: parent, number, state_root, extrinsics_root, digests }),
			body,
			events: None,
			diff: None,
		})
	}

	fn snapshot_status(&self, number: u32, hash: H256, parent: H256) -> BlockStatus {
		let best = self.inner.best.borrow().clone();
		if best.is_empty() {
			return BlockStatus::Unknown;
		}
		self.inner.status_against(&best, number, hash, parent)
	}
}

impl LedgerInner {
	fn track(self: &Arc<Self>, block: BlockRef) -> watch::Receiver<BlockRecord> {
		{
			let mut state = lock(&self.state);
			if let Some(tx) = state.blocks.get(&block.hash) {
				return tx.subscribe();
			}
			let (tx, rx) = watch::channel(BlockRecord::new(block));
			state.blocks.insert(block.hash, tx);
			state.by_height.entry(block.number).or_default().insert(block.hash);
			drop(state);
			self.spawn_fetch(block);
			self.spawn_status(block);
			self.spawn_ttl(block.hash);
			rx
		}
	}

	/// Fetch header/body/events concurrently; each field independently
	/// degrades to `None` on failure.
	fn spawn_fetch(self: &Arc<Self>, block: BlockRef) {
		let inner = self.clone();
		tokio::spawn(async move {
			let hash = block.hash;
			let (header, body, events) = tokio::join!(
				async {
					match inner.client.block_header(hash).await {
						Ok(header) => Some(header),
						Err(e) => {
							log::error!("header fetch failed for {hash:?}: {e}");
							None
						},
					}
				},
				async {
					match inner.client.block_body(hash).await {
						Ok(body) => Some(body),
						Err(e) => {
							log::error!("body fetch failed for {hash:?}: {e}");
							None
						},
					}
				},
				async {
					match inner.client.system_events(hash).await {
						Ok(events) => Some(events),
						Err(e) => {
							log::error!("events fetch failed for {hash:?}: {e}");
							None
						},
					}
				},
			);
			let diff = match inner.client.storage_diff(block.parent, hash).await {
				Ok(diff) => diff.filter(|d| !d.is_empty()),
				Err(e) => {
					log::error!("storage diff failed for {hash:?}: {e}");
					None
				},
			};
			inner.apply(hash, |record| {
				record.header = header;
				record.body = body;
				record.events = events;
				record.diff = diff;
			});
		});
	}

	/// Recompute the status on every best-chain update until terminal.
	fn spawn_status(self: &Arc<Self>, block: BlockRef) {
		let inner = self.clone();
		tokio::spawn(async move {
			let mut best = inner.best.clone();
			best.mark_changed();
			loop {
				tokio::select! {
					_ = inner.reset.cancelled() => break,
					changed = best.changed() => {
						if changed.is_err() {
							break;
						}
					},
				}
				let list = best.borrow_and_update().clone();
				if list.is_empty() {
					continue;
				}
				let status =
					inner.status_against(&list, block.number, block.hash, block.parent);
				let state = lock(&inner.state);
				let Some(tx) = state.blocks.get(&block.hash) else {
					break;
				};
				tx.send_if_modified(|record| {
					// Terminal states never move backward.
					if record.status == status || record.status.is_terminal() {
						return false;
					}
					record.status = status;
					true
				});
				drop(state);
				if status.is_terminal() {
					break;
				}
			}
		});
	}

	fn spawn_ttl(self: &Arc<Self>, hash: H256) {
		let inner = self.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = inner.reset.cancelled() => {},
				_ = tokio::time::sleep(inner.ttl) => inner.evict(hash),
			}
		});
	}

	/// Compute a block's status against a best-chain snapshot.
	///
	/// `best` is ordered root-to-tip with the latest finalized block first.
	/// On a `Finalized` verdict the parent is opportunistically recorded in
	/// the finalized-height cache, which speeds up ancestor lookups without a
	/// full chain walk.
	fn status_against(
		&self,
		best: &[BlockRef],
		number: u32,
		hash: H256,
		parent: H256,
	) -> BlockStatus {
		let mut finalized_heights = lock(&self.finalized_heights);
		let Some(finalized) = best.first() else {
			return BlockStatus::Unknown;
		};
		let status = if finalized.number == number {
			if finalized.hash == hash {
				BlockStatus::Finalized
			} else {
				BlockStatus::Pruned
			}
		} else if finalized.number < number {
			if best.iter().any(|b| b.hash == hash) {
				BlockStatus::Best
			} else {
				BlockStatus::Fork
			}
		} else if finalized_heights.contains_key(&hash) {
			BlockStatus::Finalized
		} else {
			BlockStatus::Unknown
		};
		if status == BlockStatus::Finalized && !finalized_heights.contains_key(&parent) {
			finalized_heights.insert(parent, number.saturating_sub(1));
		}
		status
	}

	/// Apply a mutation to a tracked record; results for an already evicted
	/// hash are discarded.
	fn apply(&self, hash: H256, f: impl FnOnce(&mut BlockRecord)) {
		let state = lock(&self.state);
		if let Some(tx) = state.blocks.get(&hash) {
			tx.send_modify(f);
		}
	}

	fn on_unpinned(&self, hash: H256) {
		let state = lock(&self.state);
		// Tracked blocks stay until their TTL; fallback-resolved blocks
		// already sit in the transient map, so in-flight viewers keep state.
		if !state.blocks.contains_key(&hash) && !state.transient.contains_key(&hash) {
			log::debug!("unpinned untracked block {hash:?}");
		}
	}

	fn evict(&self, hash: H256) {
		let mut state = lock(&self.state);
		if let Some(tx) = state.blocks.remove(&hash) {
			let number = tx.borrow().number;
			if let Some(at_height) = state.by_height.get_mut(&number) {
				at_height.remove(&hash);
				if at_height.is_empty() {
					state.by_height.remove(&number);
				}
			}
		}
	}
}

/// Normalize and parse a block hash, accepting bare or `0x`-prefixed hex.
fn parse_hash(input: &str) -> Result<H256, LedgerError> {
	let hex_part = input.strip_prefix("0x").unwrap_or(input);
	let bytes = hex::decode(hex_part)
		.map_err(|_| LedgerError::InvalidBlockId(input.to_string()))?;
	if bytes.len() != 32 {
		return Err(LedgerError::InvalidBlockId(input.to_string()));
	}
	Ok(H256::from_slice(&bytes))
}

fn invalid(message: &str) -> ClientError {
	ClientError::InvalidResponse(message.to_string())
}
