// SPDX-License-Identifier: GPL-3.0

//! Reactive core of a chain console for live Polkadot SDK chains.
//!
//! This crate provides the state layer behind a block/storage explorer with a
//! scriptable console: it tracks recently seen blocks, reconciles storage
//! subscriptions across best-chain reorganizations, and runs user scripts in
//! an embedded JavaScript sandbox. It owns no networking of its own; a chain
//! client collaborator is consumed through the [`client::ChainClient`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        chain client                             │
//! │        (pins / best chain / finalized / point queries)          │
//! └─────────────────────────────────────────────────────────────────┘
//!           │                   │                     │
//!           ▼                   ▼                     ▼
//! ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────┐
//! │   Block Ledger  │  │  Subscription   │  │   Script Sandbox    │
//! │ (status, fields,│  │    Registry     │  │  (Boa JS, captured  │
//! │  TTL retention) │  │ (settled versus │  │   output, cancel)   │
//! │                 │  │ unsettled view) │  │                     │
//! └─────────────────┘  └─────────────────┘  └─────────────────────┘
//!           │                   │                     │
//!           └───────────────────┼─────────────────────┘
//!                               ▼
//!                    ┌─────────────────────┐
//!                    │     AppContext      │
//!                    │ (chain selection,   │
//!                    │  script buffer,     │
//!                    │  store, switches)   │
//!                    └─────────────────────┘
//! ```

pub mod client;
mod context;
pub mod error;
mod ledger;
mod registry;
mod sandbox;
mod selection;
mod store;
mod strings;
pub mod testing;

pub use client::{
	BlockFeed, BlockHeader, BlockRef, ChainClient, ChainStreams, DecodedValue, DigestItem,
	PinEvent, StorageDiff,
};
pub use context::{AppContext, Endpoint, Network, SelectedChain};
pub use error::{ClientError, LedgerError, SandboxError, StoreError};
pub use ledger::{BlockLedger, BlockRecord, BlockStatus};
pub use registry::{
	BlockQuery, KeyCodec, KeyCodecProducer, Subscription, SubscriptionRegistry,
	SubscriptionResult, SubscriptionSpec, SubscriptionStatus, ValueProducer, WatchValue,
};
pub use sandbox::{
	generate_query_snippet, generate_tx_snippet, HostFn, RunOutcome, ScriptHandle, ScriptSandbox,
};
pub use selection::{toggle_key_count, EntrySelection, PalletEntries};
pub use store::{ConsoleStore, MetadataCacheEntry};
pub use strings::store::DEFAULT_SCRIPT;

/// Lock a mutex, recovering the data from a poisoned lock instead of
/// propagating the panic.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
	match mutex.lock() {
		Ok(guard) => guard,
		Err(poisoned) => poisoned.into_inner(),
	}
}
