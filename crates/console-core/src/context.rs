// SPDX-License-Identifier: GPL-3.0

//! Application context: chain selection, the script buffer and the
//! switch cascade.
//!
//! One [`AppContext`] exists per application. It owns the store handle and
//! the per-connection components (ledger, registry); switching chains tears
//! the old connection's state down as a hard reset before anything about the
//! new connection becomes visible, and bumps a connection epoch so derived
//! values from the old connection can be recognized as stale and never
//! merged back.

use crate::{
	client::{BlockFeed, ChainClient, ChainStreams},
	error::StoreError,
	ledger::BlockLedger,
	registry::SubscriptionRegistry,
	store::ConsoleStore,
	strings::store::{keys, DEFAULT_SCRIPT},
};
use std::sync::Arc;
use url::Url;

/// A known network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
	/// Stable identifier (e.g. genesis-derived or well-known name).
	pub id: String,
	/// Human-readable name.
	pub display_name: String,
	/// The relay chain this network is a parachain of, if any.
	pub relay_chain: Option<String>,
}

/// How the chain is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
	/// A JSON-RPC endpoint.
	Url(Url),
	/// An embedded light client.
	LightClient,
}

/// The currently selected chain connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedChain {
	/// The network.
	pub network: Network,
	/// The endpoint in use.
	pub endpoint: Endpoint,
	/// Whether a local fork overlay is layered on top of the connection.
	pub with_fork: bool,
}

/// The process-wide application context.
pub struct AppContext {
	store: ConsoleStore,
	selected: SelectedChain,
	script: String,
	epoch: u64,
	ledger: BlockLedger,
	registry: SubscriptionRegistry,
}

impl AppContext {
	/// Initialize the context over an established chain connection.
	///
	/// The script buffer starts from its persisted value, or from the default
	/// template when nothing usable was persisted.
	pub async fn init(
		store: ConsoleStore,
		selected: SelectedChain,
		client: Arc<dyn ChainClient>,
		streams: ChainStreams,
	) -> Result<Self, StoreError> {
		let script = store
			.script(keys::SCRIPT)
			.await?
			.filter(|body| !body.trim().is_empty())
			.unwrap_or_else(|| DEFAULT_SCRIPT.to_string());
		let (ledger, registry) = Self::connect(client, streams);
		Ok(Self { store, selected, script, epoch: 0, ledger, registry })
	}

	/// The currently selected chain.
	pub fn selected_chain(&self) -> &SelectedChain {
		&self.selected
	}

	/// The block ledger of the current connection.
	pub fn ledger(&self) -> &BlockLedger {
		&self.ledger
	}

	/// The subscription registry of the current connection.
	pub fn registry(&self) -> &SubscriptionRegistry {
		&self.registry
	}

	/// The connection epoch; bumped on every chain switch. Derived values
	/// carrying an older epoch are stale and must be discarded.
	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	/// The current script buffer.
	pub fn script(&self) -> &str {
		&self.script
	}

	/// Replace the script buffer, writing through to the store.
	pub async fn set_script(&mut self, body: String) -> Result<(), StoreError> {
		self.store.save_script(keys::SCRIPT, &body).await?;
		self.script = body;
		Ok(())
	}

	/// Append a snippet to the script buffer with a blank-line separator.
	pub async fn append_script(&mut self, snippet: &str) -> Result<(), StoreError> {
		let mut body = self.script.clone();
		if !body.trim().is_empty() {
			body.push_str("\n\n");
		}
		body.push_str(snippet);
		self.set_script(body).await
	}

	/// Switch to a different chain connection.
	///
	/// The old connection's derived state is torn down first: the ledger
	/// drops all retained blocks and every registry subscription is forcibly
	/// completed (entries stay listed with their last values). Only then does
	/// the new connection become current.
	pub fn change_chain(
		&mut self,
		selected: SelectedChain,
		client: Arc<dyn ChainClient>,
		streams: ChainStreams,
	) {
		log::debug!(
			"switching chain: {} -> {}",
			self.selected.network.id,
			selected.network.id
		);
		self.ledger.reset();
		self.registry.complete_all();
		self.epoch += 1;
		let (ledger, registry) = Self::connect(client, streams);
		self.ledger = ledger;
		self.registry = registry;
		self.selected = selected;
	}

	/// Flush pending state to the store. Called on application teardown.
	pub async fn teardown(&self) -> Result<(), StoreError> {
		self.store.save_script(keys::SCRIPT, &self.script).await
	}

	fn connect(
		client: Arc<dyn ChainClient>,
		streams: ChainStreams,
	) -> (BlockLedger, SubscriptionRegistry) {
		let feed =
			BlockFeed { finalized: streams.finalized.clone(), best: streams.best.clone() };
		(BlockLedger::new(client, streams), SubscriptionRegistry::new(feed))
	}
}
