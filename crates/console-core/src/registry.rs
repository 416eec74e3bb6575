// SPDX-License-Identifier: GPL-3.0

//! Subscription registry: an id-keyed store of long-lived, independently
//! cancellable observations, used uniformly for storage queries, runtime-call
//! invocations and view-function invocations.
//!
//! Each submitted subscription gets a driver task that evaluates its producer
//! and publishes [`Subscription`] snapshots through a `watch` channel. Watch
//! subscriptions over storage reconcile finalized (settled) and best-block
//! (unsettled) evaluations through [`WatchAccumulator`], so consumers see a
//! stable view that prefers finalized truth but still surfaces live updates.
//!
//! ```text
//! submit(spec) ──► driver task ──► watch<Subscription>
//!                    │
//!                    ├── finalized stream ──► settled evaluation
//!                    └── best stream ───────► unsettled evaluations (single)
//! ```

use crate::{
	client::{BlockFeed, DecodedValue},
	lock,
};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::{
	collections::HashSet,
	fmt,
	sync::{Arc, Mutex},
};
use subxt::config::substrate::H256;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The outcome of evaluating a producer at one block.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionResult {
	/// The producer returned a decoded value.
	Success(DecodedValue),
	/// The evaluation at this block failed; other blocks are unaffected.
	Error(String),
}

/// Encode/decode handles for a storage entry's composite key.
///
/// Multi-entry watch results come back keyed by raw storage keys; the codec
/// turns key parts into a hex key and back, using the runtime of the block it
/// was produced for.
pub struct KeyCodec {
	/// Encode key parts into a hex-encoded storage key.
	pub encode: Box<dyn Fn(&[scale_value::Value]) -> Result<String, String> + Send + Sync>,
	/// Decode a hex-encoded storage key into its parts.
	pub decode: Box<dyn Fn(&str) -> Result<Vec<scale_value::Value>, String> + Send + Sync>,
}

impl fmt::Debug for KeyCodec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyCodec").finish_non_exhaustive()
	}
}

/// Produces the [`KeyCodec`] valid at a specific block.
pub type KeyCodecProducer =
	Arc<dyn Fn(H256) -> BoxFuture<'static, Option<Arc<KeyCodec>>> + Send + Sync>;

/// One reconciled entry of a watch subscription's value list.
#[derive(Debug, Clone)]
pub struct WatchValue {
	/// Height of the evaluated block.
	pub height: u32,
	/// Hash of the evaluated block.
	pub block_hash: H256,
	/// Whether the block was finalized at evaluation time.
	pub settled: bool,
	/// Key codec at the evaluated block; attached to successful evaluations
	/// of subscriptions that supplied a producer.
	pub key_codec: Option<Arc<KeyCodec>>,
	/// The evaluation outcome.
	pub result: SubscriptionResult,
}

impl PartialEq for WatchValue {
	fn eq(&self, other: &Self) -> bool {
		let codecs_match = match (&self.key_codec, &other.key_codec) {
			(Some(a), Some(b)) => Arc::ptr_eq(a, b),
			(None, None) => true,
			_ => false,
		};
		self.height == other.height
			&& self.block_hash == other.block_hash
			&& self.settled == other.settled
			&& codecs_match
			&& self.result == other.result
	}
}

/// Where a subscription currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionStatus {
	/// No value produced yet; also the status while the connection is down.
	Loading,
	/// A one-shot producer resolved.
	Value(SubscriptionResult),
	/// The reconciled value list of a watch subscription.
	Values(Vec<WatchValue>),
}

/// A snapshot of one subscription, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
	/// Display name.
	pub name: String,
	/// Stringified key arguments, if any.
	pub args: Option<Vec<String>>,
	/// Whether this watches a single storage value (enables best-block
	/// evaluation) rather than taking one finalized result.
	pub single: bool,
	/// Set once the subscription stops producing, for any reason.
	pub completed: bool,
	/// The current status.
	pub status: SubscriptionStatus,
}

/// A storage query evaluated per block hash.
pub type BlockQuery = Arc<dyn Fn(H256) -> BoxFuture<'static, SubscriptionResult> + Send + Sync>;

/// How a subscription obtains its values.
pub enum ValueProducer {
	/// Resolves once: runtime calls, view functions, decode-only
	/// pseudo-queries.
	OneShot(BoxFuture<'static, SubscriptionResult>),
	/// Re-evaluated against newly finalized blocks and, for `single`
	/// subscriptions, live best blocks.
	PerBlock(BlockQuery),
}

/// Everything needed to register a subscription.
pub struct SubscriptionSpec {
	/// Display name.
	pub name: String,
	/// Stringified key arguments, if any.
	pub args: Option<Vec<String>>,
	/// See [`Subscription::single`].
	pub single: bool,
	/// Per-block key codec for multi-entry storage watches, if the entry has
	/// a composite key.
	pub key_codec: Option<KeyCodecProducer>,
	/// The producer.
	pub producer: ValueProducer,
}

struct SubscriptionEntry {
	rx: watch::Receiver<Subscription>,
	stop: CancellationToken,
}

struct RegistryInner {
	feed: BlockFeed,
	subs: Mutex<IndexMap<Uuid, SubscriptionEntry>>,
}

/// The subscription registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SubscriptionRegistry {
	inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
	/// Create a registry over one chain connection's block feed.
	pub fn new(feed: BlockFeed) -> Self {
		Self { inner: Arc::new(RegistryInner { feed, subs: Mutex::new(IndexMap::new()) }) }
	}

	/// Register a subscription and start its driver.
	///
	/// Registration is synchronous and the first observable status is always
	/// [`SubscriptionStatus::Loading`].
	pub fn submit(&self, spec: SubscriptionSpec) -> Uuid {
		let SubscriptionSpec { name, args, single, key_codec, producer } = spec;
		let id = Uuid::new_v4();
		let (tx, rx) = watch::channel(Subscription {
			name,
			args,
			single,
			completed: false,
			status: SubscriptionStatus::Loading,
		});
		let stop = CancellationToken::new();
		lock(&self.inner.subs).insert(id, SubscriptionEntry { rx, stop: stop.clone() });
		match producer {
			ValueProducer::OneShot(fut) => {
				tokio::spawn(drive_one_shot(tx, fut, stop));
			},
			ValueProducer::PerBlock(query) => {
				tokio::spawn(drive_watch(
					tx,
					query,
					key_codec,
					single,
					self.inner.feed.clone(),
					stop,
				));
			},
		}
		log::debug!("subscription {id} registered");
		id
	}

	/// Subscribe to a subscription's snapshots.
	pub fn status_of(&self, id: &Uuid) -> Option<watch::Receiver<Subscription>> {
		lock(&self.inner.subs).get(id).map(|entry| entry.rx.clone())
	}

	/// Stop producing values; captured values stay visible and the id stays
	/// listed.
	pub fn stop(&self, id: &Uuid) {
		if let Some(entry) = lock(&self.inner.subs).get(id) {
			entry.stop.cancel();
		}
	}

	/// Stop and drop the subscription entirely.
	pub fn remove(&self, id: &Uuid) {
		if let Some(entry) = lock(&self.inner.subs).shift_remove(id) {
			entry.stop.cancel();
		}
	}

	/// Live subscription ids, newest first.
	pub fn keys(&self) -> Vec<Uuid> {
		lock(&self.inner.subs).keys().rev().copied().collect()
	}

	/// Forcibly complete every subscription; entries stay listed with their
	/// last values. Called on a chain switch.
	pub fn complete_all(&self) {
		for entry in lock(&self.inner.subs).values() {
			entry.stop.cancel();
		}
	}
}

async fn drive_one_shot(
	tx: watch::Sender<Subscription>,
	fut: BoxFuture<'static, SubscriptionResult>,
	stop: CancellationToken,
) {
	tokio::select! {
		_ = stop.cancelled() => {},
		result = fut => {
			tx.send_modify(|sub| sub.status = SubscriptionStatus::Value(result));
		},
	}
	tx.send_modify(|sub| sub.completed = true);
}

async fn drive_watch(
	tx: watch::Sender<Subscription>,
	query: BlockQuery,
	key_codec: Option<KeyCodecProducer>,
	single: bool,
	feed: BlockFeed,
	stop: CancellationToken,
) {
	let BlockFeed { mut finalized, mut best } = feed;
	let mut acc = WatchAccumulator::default();
	// Guards best-block evaluations only; a later finalized evaluation of the
	// same hash still runs, tagged settled.
	let mut evaluated = HashSet::new();
	finalized.mark_changed();
	if single {
		best.mark_changed();
	}
	loop {
		tokio::select! {
			_ = stop.cancelled() => break,
			changed = finalized.changed() => {
				if changed.is_err() {
					break;
				}
				let Some(block) = *finalized.borrow_and_update() else { continue };
				let Some((result, codec)) =
					evaluate(&query, key_codec.as_ref(), block.hash, &stop).await
				else {
					break;
				};
				acc.settle(WatchValue {
					height: block.number,
					block_hash: block.hash,
					settled: true,
					key_codec: codec,
					result,
				});
				publish(&tx, &acc);
				// Non-single subscriptions take one finalized result.
				if !single {
					break;
				}
			},
			changed = best.changed(), if single => {
				if changed.is_err() {
					break;
				}
				let list = best.borrow_and_update().clone();
				// Live blocks above the finalized anchor, one evaluation per
				// distinct hash.
				let mut cancelled = false;
				for block in list.iter().skip(1) {
					if !evaluated.insert(block.hash) {
						continue;
					}
					let Some((result, codec)) =
						evaluate(&query, key_codec.as_ref(), block.hash, &stop).await
					else {
						cancelled = true;
						break;
					};
					acc.push_unsettled(WatchValue {
						height: block.number,
						block_hash: block.hash,
						settled: false,
						key_codec: codec,
						result,
					});
					publish(&tx, &acc);
				}
				if cancelled {
					break;
				}
			},
		}
	}
	tx.send_modify(|sub| sub.completed = true);
}

fn publish(tx: &watch::Sender<Subscription>, acc: &WatchAccumulator) {
	tx.send_modify(|sub| sub.status = SubscriptionStatus::Values(acc.visible()));
}

/// Race an evaluation against the stop token; an in-flight evaluation that
/// loses the race is discarded. Successful evaluations also resolve the key
/// codec at the same block; failed ones carry none.
async fn evaluate(
	query: &BlockQuery,
	key_codec: Option<&KeyCodecProducer>,
	hash: H256,
	stop: &CancellationToken,
) -> Option<(SubscriptionResult, Option<Arc<KeyCodec>>)> {
	let fut = async {
		let result = query(hash).await;
		let codec = match (&result, key_codec) {
			(SubscriptionResult::Success(_), Some(produce)) => produce(hash).await,
			_ => None,
		};
		(result, codec)
	};
	tokio::select! {
		_ = stop.cancelled() => None,
		value = fut => Some(value),
	}
}

fn fingerprint_of(value: &WatchValue) -> Option<String> {
	match &value.result {
		SubscriptionResult::Success(decoded) => decoded.fingerprint.clone(),
		SubscriptionResult::Error(_) => None,
	}
}

/// Pure reconciliation of settled and unsettled evaluations.
///
/// Settled values form a height-sorted list with content-fingerprint
/// de-duplication (earliest height wins). Unsettled values track the live
/// best-block view: a new value evicts stale higher entries, consecutive
/// duplicate fingerprints collapse to the most recent occurrence, and a
/// settlement reduces the list to the most recent fingerprint run before
/// dropping anything the settled list already accounts for.
#[derive(Default)]
struct WatchAccumulator {
	settled: Vec<WatchValue>,
	settled_heights: std::collections::HashMap<String, u32>,
	unsettled: Vec<WatchValue>,
}

impl WatchAccumulator {
	fn settle(&mut self, value: WatchValue) {
		let height = value.height;
		match fingerprint_of(&value) {
			Some(fp) => match self.settled_heights.get(&fp) {
				Some(&prev) if height < prev => {
					// The same content was seen at a lower finalized height;
					// the earliest occurrence is the one that matters.
					self.settled_heights.insert(fp.clone(), height);
					self.settled.retain(|s| fingerprint_of(s).as_deref() != Some(&fp));
					self.insert_settled(value);
				},
				// Later duplicate of known content: dropped.
				Some(_) => {},
				None => {
					self.settled_heights.insert(fp, height);
					self.insert_settled(value);
				},
			},
			// Without a fingerprint the value is treated as unique.
			None => self.insert_settled(value),
		}

		// Settlement passed these by.
		self.unsettled.retain(|u| u.height > height);
		// Once a finalized anchor exists, only the most recent unsettled
		// observation run is live; older provisional deviations are stale.
		if let Some(last) = self.unsettled.last() {
			let tail_fp = fingerprint_of(last);
			let run_start = match &tail_fp {
				Some(fp) => self
					.unsettled
					.iter()
					.rposition(|u| fingerprint_of(u).as_deref() != Some(fp))
					.map(|i| i + 1)
					.unwrap_or(0),
				None => self.unsettled.len() - 1,
			};
			self.unsettled.drain(..run_start);
		}
		self.unsettled.retain(|u| match fingerprint_of(u) {
			Some(fp) => !self.settled_heights.contains_key(&fp),
			None => true,
		});
	}

	fn push_unsettled(&mut self, value: WatchValue) {
		// The chain view reorganized past anything at or above this height.
		self.unsettled.retain(|u| u.height < value.height);
		self.unsettled.push(value);

		let mut collapsed: Vec<WatchValue> = Vec::with_capacity(self.unsettled.len());
		for value in self.unsettled.drain(..) {
			let fp = fingerprint_of(&value);
			let duplicate = fp.is_some()
				&& collapsed.last().map(fingerprint_of) == Some(fp);
			if duplicate {
				// Consecutive duplicates collapse to the most recent block.
				if let Some(last) = collapsed.last_mut() {
					*last = value;
				}
			} else {
				collapsed.push(value);
			}
		}
		self.unsettled = collapsed;
	}

	/// Settled values followed by the unsettled entries whose content the
	/// settled list does not already carry.
	fn visible(&self) -> Vec<WatchValue> {
		self.settled
			.iter()
			.cloned()
			.chain(self.unsettled.iter().cloned().filter(|u| match fingerprint_of(u) {
				Some(fp) => !self.settled_heights.contains_key(&fp),
				None => true,
			}))
			.collect()
	}

	fn insert_settled(&mut self, value: WatchValue) {
		self.settled.push(value);
		self.settled.sort_by_key(|s| s.height);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{block_ref, chain, chain_streams, hash};
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration,
	};

	fn success(fp: &str) -> SubscriptionResult {
		SubscriptionResult::Success(DecodedValue {
			type_id: 0,
			value: scale_value::Value::u128(0),
			fingerprint: Some(fp.to_string()),
		})
	}

	fn value(height: u32, settled: bool, fp: &str) -> WatchValue {
		WatchValue {
			height,
			block_hash: hash(height as u64),
			settled,
			key_codec: None,
			result: success(fp),
		}
	}

	fn error(height: u32, settled: bool) -> WatchValue {
		WatchValue {
			height,
			block_hash: hash(height as u64),
			settled,
			key_codec: None,
			result: SubscriptionResult::Error("boom".to_string()),
		}
	}

	async fn settle() {
		tokio::task::yield_now().await;
		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	mod accumulator {
		use super::*;

		#[test]
		fn settled_list_stays_height_ordered_and_deduplicated() {
			let mut acc = WatchAccumulator::default();
			acc.settle(value(12, true, "C"));
			acc.settle(value(10, true, "A"));
			acc.settle(value(11, true, "A"));

			let visible = acc.visible();
			assert_eq!(visible.len(), 2);
			assert_eq!((visible[0].height, visible[1].height), (10, 12));
			// A appears once, at its earliest height.
			assert_eq!(fingerprint_of(&visible[0]).as_deref(), Some("A"));
		}

		#[test]
		fn settled_duplicate_at_lower_height_supersedes() {
			let mut acc = WatchAccumulator::default();
			acc.settle(value(11, true, "A"));
			acc.settle(value(10, true, "A"));

			let visible = acc.visible();
			assert_eq!(visible.len(), 1);
			assert_eq!(visible[0].height, 10);
		}

		#[test]
		fn unfingerprinted_settled_values_are_unique() {
			let mut acc = WatchAccumulator::default();
			let mut a = value(10, true, "A");
			let mut b = value(11, true, "A");
			if let SubscriptionResult::Success(decoded) = &mut a.result {
				decoded.fingerprint = None;
			}
			if let SubscriptionResult::Success(decoded) = &mut b.result {
				decoded.fingerprint = None;
			}
			acc.settle(a);
			acc.settle(b);
			assert_eq!(acc.visible().len(), 2);
		}

		#[test]
		fn new_unsettled_evicts_higher_entries() {
			let mut acc = WatchAccumulator::default();
			acc.push_unsettled(value(10, false, "A"));
			acc.push_unsettled(value(11, false, "B"));
			// Reorg: a new block at height 11 invalidates the old one.
			acc.push_unsettled(value(11, false, "C"));

			let visible = acc.visible();
			assert_eq!(visible.len(), 2);
			assert_eq!(fingerprint_of(&visible[1]).as_deref(), Some("C"));
		}

		#[test]
		fn consecutive_duplicates_collapse_to_most_recent() {
			let mut acc = WatchAccumulator::default();
			acc.push_unsettled(value(10, false, "A"));
			acc.push_unsettled(value(11, false, "A"));

			let visible = acc.visible();
			assert_eq!(visible.len(), 1);
			assert_eq!(visible[0].height, 11);
		}

		#[test]
		fn errors_are_recorded_per_height_and_never_collapsed() {
			let mut acc = WatchAccumulator::default();
			acc.push_unsettled(error(10, false));
			acc.push_unsettled(error(11, false));
			assert_eq!(acc.visible().len(), 2);
		}

		#[test]
		fn settlement_scenario_clears_matching_unsettled_tail() {
			// Best-block values at [10, 11, 12] with contents [A, B, A], then
			// height 10 finalizes with A.
			let mut acc = WatchAccumulator::default();
			acc.push_unsettled(value(10, false, "A"));
			acc.push_unsettled(value(11, false, "B"));
			acc.push_unsettled(value(12, false, "A"));
			acc.settle(value(10, true, "A"));

			let visible = acc.visible();
			assert_eq!(visible.len(), 1);
			assert_eq!((visible[0].height, visible[0].settled), (10, true));
			assert!(acc.unsettled.is_empty());
		}

		#[test]
		fn settlement_keeps_diverging_unsettled_tip() {
			let mut acc = WatchAccumulator::default();
			acc.push_unsettled(value(10, false, "A"));
			acc.push_unsettled(value(11, false, "B"));
			acc.push_unsettled(value(12, false, "C"));
			acc.settle(value(10, true, "A"));

			let visible = acc.visible();
			assert_eq!(visible.len(), 2);
			assert_eq!((visible[1].height, visible[1].settled), (12, false));
		}
	}

	fn pending_producer() -> ValueProducer {
		ValueProducer::OneShot(Box::pin(futures::future::pending()))
	}

	fn spec(name: &str, single: bool, producer: ValueProducer) -> SubscriptionSpec {
		SubscriptionSpec { name: name.to_string(), args: None, single, key_codec: None, producer }
	}

	fn account_codec() -> Arc<KeyCodec> {
		Arc::new(KeyCodec {
			encode: Box::new(|parts| Ok(format!("0x{:02x}", parts.len()))),
			decode: Box::new(|key| {
				let n = key.trim_start_matches("0x").len() / 2;
				Ok(vec![scale_value::Value::u128(n as u128)])
			}),
		})
	}

	fn codec_producer(codec: Arc<KeyCodec>) -> KeyCodecProducer {
		Arc::new(move |_hash| {
			let codec = codec.clone();
			Box::pin(async move { Some(codec) })
		})
	}

	#[tokio::test]
	async fn first_status_is_loading() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let id = registry.submit(spec("pending", false, pending_producer()));
		let rx = registry.status_of(&id).unwrap();
		let sub = rx.borrow().clone();
		assert_eq!(sub.status, SubscriptionStatus::Loading);
		assert!(!sub.completed);
	}

	#[tokio::test]
	async fn one_shot_resolves_and_completes() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let id = registry.submit(spec(
			"runtime call",
			false,
			ValueProducer::OneShot(Box::pin(async { success("A") })),
		));
		settle().await;

		let sub = registry.status_of(&id).unwrap().borrow().clone();
		assert_eq!(sub.status, SubscriptionStatus::Value(success("A")));
		assert!(sub.completed);
	}

	#[tokio::test]
	async fn keys_are_newest_first() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let first = registry.submit(spec("a", false, pending_producer()));
		let second = registry.submit(spec("b", false, pending_producer()));
		assert_eq!(registry.keys(), vec![second, first]);
	}

	#[tokio::test]
	async fn stop_completes_but_keeps_the_entry() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let id = registry.submit(spec("stoppable", false, pending_producer()));
		registry.stop(&id);
		settle().await;

		assert_eq!(registry.keys(), vec![id]);
		let sub = registry.status_of(&id).unwrap().borrow().clone();
		assert!(sub.completed);
		assert_eq!(sub.status, SubscriptionStatus::Loading);
	}

	#[tokio::test]
	async fn stop_then_remove_leaves_no_trace() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let id = registry.submit(spec("ephemeral", false, pending_producer()));
		registry.stop(&id);
		registry.remove(&id);

		assert!(registry.keys().is_empty());
		assert!(registry.status_of(&id).is_none());
	}

	#[tokio::test]
	async fn non_single_watch_takes_one_finalized_result() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());
		let calls = Arc::new(AtomicUsize::new(0));

		let query: BlockQuery = {
			let calls = calls.clone();
			Arc::new(move |_hash| {
				calls.fetch_add(1, Ordering::SeqCst);
				Box::pin(async { success("A") })
			})
		};
		let id = registry.submit(spec("entries", false, ValueProducer::PerBlock(query)));

		feed.finalized.send_replace(Some(block_ref(10, 1)));
		settle().await;
		feed.finalized.send_replace(Some(block_ref(11, 1)));
		settle().await;

		let sub = registry.status_of(&id).unwrap().borrow().clone();
		assert!(sub.completed);
		match &sub.status {
			SubscriptionStatus::Values(values) => {
				assert_eq!(values.len(), 1);
				assert_eq!(values[0].height, 10);
				assert!(values[0].settled);
			},
			other => panic!("unexpected status: {other:?}"),
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn single_watch_reconciles_best_and_finalized() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());
		let calls = Arc::new(AtomicUsize::new(0));

		// Content alternates A, B, A across heights 10..=12.
		let query: BlockQuery = {
			let calls = calls.clone();
			Arc::new(move |hash| {
				calls.fetch_add(1, Ordering::SeqCst);
				let fp = if hash == block_ref(11, 1).hash { "B" } else { "A" };
				let result = success(fp);
				Box::pin(async move { result })
			})
		};
		let id = registry.submit(spec("watched", true, ValueProducer::PerBlock(query)));

		let blocks = chain(9, 12);
		feed.best.send_replace(blocks.clone());
		settle().await;
		// Re-sending the list must not re-evaluate known hashes.
		feed.best.send_replace(blocks.clone());
		settle().await;
		assert_eq!(calls.load(Ordering::SeqCst), 3);

		feed.finalized.send_replace(Some(blocks[1]));
		settle().await;

		let sub = registry.status_of(&id).unwrap().borrow().clone();
		assert!(!sub.completed);
		match &sub.status {
			SubscriptionStatus::Values(values) => {
				assert_eq!(values.len(), 1);
				assert_eq!((values[0].height, values[0].settled), (10, true));
			},
			other => panic!("unexpected status: {other:?}"),
		}
	}

	#[tokio::test]
	async fn watch_values_carry_the_key_codec_of_their_block() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());
		let codec = account_codec();

		let query: BlockQuery = Arc::new(|_hash| Box::pin(async { success("A") }));
		let mut spec = spec("System.Account", false, ValueProducer::PerBlock(query));
		spec.key_codec = Some(codec_producer(codec.clone()));
		let id = registry.submit(spec);

		feed.finalized.send_replace(Some(block_ref(10, 1)));
		settle().await;

		let sub = registry.status_of(&id).unwrap().borrow().clone();
		match &sub.status {
			SubscriptionStatus::Values(values) => {
				let attached = values[0].key_codec.as_ref().unwrap();
				assert!(Arc::ptr_eq(attached, &codec));
				assert_eq!((attached.encode)(&[]).unwrap(), "0x00");
				assert_eq!((attached.decode)("0xdeadbeef").unwrap().len(), 1);
			},
			other => panic!("unexpected status: {other:?}"),
		}
	}

	#[tokio::test]
	async fn failed_evaluations_carry_no_key_codec() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let query: BlockQuery = Arc::new(|_hash| {
			Box::pin(async { SubscriptionResult::Error("decode failed".to_string()) })
		});
		let mut spec = spec("System.Account", false, ValueProducer::PerBlock(query));
		spec.key_codec = Some(codec_producer(account_codec()));
		let id = registry.submit(spec);

		feed.finalized.send_replace(Some(block_ref(10, 1)));
		settle().await;

		let sub = registry.status_of(&id).unwrap().borrow().clone();
		match &sub.status {
			SubscriptionStatus::Values(values) => {
				assert_eq!(values[0].result, SubscriptionResult::Error("decode failed".to_string()));
				assert!(values[0].key_codec.is_none());
			},
			other => panic!("unexpected status: {other:?}"),
		}
	}

	#[tokio::test]
	async fn complete_all_marks_every_subscription() {
		let (feed, _streams) = chain_streams();
		let registry = SubscriptionRegistry::new(feed.block_feed());

		let a = registry.submit(spec("a", false, pending_producer()));
		let b = registry.submit(spec("b", false, pending_producer()));
		registry.complete_all();
		settle().await;

		for id in [a, b] {
			assert!(registry.status_of(&id).unwrap().borrow().completed);
		}
		assert_eq!(registry.keys().len(), 2);
	}
}
