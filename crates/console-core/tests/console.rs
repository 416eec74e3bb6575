// SPDX-License-Identifier: GPL-3.0

//! End-to-end tests over the public API: persistence across restarts, the
//! block feed driving ledger and registry state, and scripts reaching back
//! into the registry through host functions.

use console_core::{
	testing::{block_ref, chain, chain_streams, MockChainClient},
	AppContext, BlockStatus, ConsoleStore, DecodedValue, Endpoint, HostFn, Network, PinEvent,
	RunOutcome, ScriptSandbox, SelectedChain, SubscriptionRegistry, SubscriptionResult,
	SubscriptionSpec, SubscriptionStatus, ValueProducer, DEFAULT_SCRIPT,
};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::sync::mpsc;

fn init_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

fn selected() -> SelectedChain {
	SelectedChain {
		network: Network {
			id: "paseo".to_string(),
			display_name: "Paseo".to_string(),
			relay_chain: None,
		},
		endpoint: Endpoint::LightClient,
		with_fork: false,
	}
}

async fn open_context(path: &Path) -> (console_core::testing::FeedHandle, AppContext) {
	let store = ConsoleStore::open(path).await.unwrap();
	let (feed, streams) = chain_streams();
	let ctx = AppContext::init(store, selected(), MockChainClient::new(), streams).await.unwrap();
	(feed, ctx)
}

async fn settle() {
	tokio::task::yield_now().await;
	tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn script_buffer_survives_a_restart() {
	init_logger();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("console.db");

	let (_feed, mut ctx) = open_context(&path).await;
	assert_eq!(ctx.script(), DEFAULT_SCRIPT);
	ctx.set_script("console.log('hello');".to_string()).await.unwrap();
	ctx.teardown().await.unwrap();
	drop(ctx);

	let (_feed, ctx) = open_context(&path).await;
	assert_eq!(ctx.script(), "console.log('hello');");
}

#[tokio::test]
async fn pin_events_drive_block_statuses() {
	init_logger();
	let dir = tempfile::tempdir().unwrap();
	let store = ConsoleStore::open(&dir.path().join("console.db")).await.unwrap();
	let client = MockChainClient::new();
	let (feed, streams) = chain_streams();
	let blocks = chain(1, 3);
	let fork = block_ref(3, 9);
	for block in blocks.iter().chain([&fork]) {
		client.add_block(*block);
	}
	let ctx = AppContext::init(store, selected(), client, streams).await.unwrap();

	for block in blocks.iter().chain([&fork]) {
		feed.pins.send(PinEvent::Pinned(*block)).unwrap();
	}
	feed.best.send_replace(blocks.clone());
	settle().await;

	let ledger = ctx.ledger();
	assert_eq!(ledger.status_of(&blocks[0].hash), Some(BlockStatus::Finalized));
	assert_eq!(ledger.status_of(&blocks[2].hash), Some(BlockStatus::Best));
	assert_eq!(ledger.status_of(&fork.hash), Some(BlockStatus::Fork));

	// A pinned block carries its fetched contents.
	let record = ledger.block(&blocks[1].hash).unwrap();
	assert!(record.header.is_some());
	assert!(record.body.is_some());
}

#[tokio::test]
async fn watch_subscription_settles_on_finalization() {
	init_logger();
	let dir = tempfile::tempdir().unwrap();
	let (feed, ctx) = open_context(&dir.path().join("console.db")).await;

	let query: console_core::BlockQuery = Arc::new(|_hash| {
		Box::pin(async {
			SubscriptionResult::Success(DecodedValue {
				type_id: 0,
				value: scale_value::Value::u128(7),
				fingerprint: Some("issuance-7".to_string()),
			})
		})
	});
	let id = ctx.registry().submit(SubscriptionSpec {
		name: "Balances.TotalIssuance".to_string(),
		args: None,
		single: true,
		key_codec: None,
		producer: ValueProducer::PerBlock(query),
	});

	let blocks = chain(9, 12);
	feed.best.send_replace(blocks.clone());
	settle().await;
	feed.finalized.send_replace(Some(blocks[1]));
	settle().await;

	let sub = ctx.registry().status_of(&id).unwrap().borrow().clone();
	assert!(!sub.completed);
	match &sub.status {
		SubscriptionStatus::Values(values) => {
			// Every best block carried the same content, so the finalized
			// observation at height 10 accounts for all of them.
			assert_eq!(values.len(), 1);
			assert_eq!((values[0].height, values[0].settled), (10, true));
		},
		other => panic!("unexpected status: {other:?}"),
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn script_reaches_the_registry_through_a_host_function() {
	init_logger();
	let (feed, _streams) = chain_streams();
	let registry = SubscriptionRegistry::new(feed.block_feed());

	let submit: HostFn = {
		let registry = registry.clone();
		Arc::new(move |args| {
			let registry = registry.clone();
			Box::pin(async move {
				let name = args
					.as_array()
					.and_then(|a| a.first())
					.and_then(|v| v.as_str())
					.ok_or_else(|| "expected a query name".to_string())?
					.to_string();
				let id = registry.submit(SubscriptionSpec {
					name,
					args: None,
					single: false,
					key_codec: None,
					producer: ValueProducer::OneShot(Box::pin(async {
						SubscriptionResult::Error("not connected".to_string())
					})),
				});
				Ok(serde_json::json!(id.to_string()))
			})
		})
	};

	let (tx, mut rx) = mpsc::unbounded_channel();
	let handle = ScriptSandbox::new().run(
		"const id = query('System.Number'); console.log(id);".to_string(),
		vec![("query".to_string(), submit)],
		tx,
	);
	assert_eq!(handle.join().await.unwrap(), RunOutcome::Completed);

	let keys = registry.keys();
	assert_eq!(keys.len(), 1);
	let logged = rx.recv().await.unwrap();
	assert_eq!(logged, keys[0].to_string());
	assert_eq!(
		registry.status_of(&keys[0]).unwrap().borrow().name,
		"System.Number"
	);
}
