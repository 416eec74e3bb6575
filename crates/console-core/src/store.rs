// SPDX-License-Identifier: GPL-3.0

//! SQLite-backed persistence for the console.
//!
//! Two small concerns live here: the user's script buffer (a single string
//! blob under a constant key) and a bounded cache of runtime metadata blobs
//! keyed by the chain's code hash. The metadata cache is purely a
//! startup-latency optimization and can be dropped at any time without
//! correctness impact.

use crate::error::StoreError;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;
use subxt::config::substrate::H256;

/// Maximum number of connections in the SQLite connection pool.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// SQLite connection string for in-memory databases.
#[cfg(test)]
const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

/// Connection pool size for in-memory databases.
///
/// Must be 1 because SQLite in-memory databases are connection-specific:
/// each connection creates a separate, isolated database instance.
#[cfg(test)]
const MEMORY_POOL_CONNECTIONS: u32 = 1;

/// Upper bound on retained metadata cache entries.
const METADATA_CACHE_CAPACITY: u32 = 3;

const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS scripts (
	name TEXT PRIMARY KEY,
	body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS metadata_cache (
	code_hash BLOB PRIMARY KEY,
	chain_id TEXT NOT NULL,
	time INTEGER NOT NULL,
	data BLOB NOT NULL
);
";

/// One cached runtime metadata blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCacheEntry {
	/// Content hash of the chain's runtime code.
	pub code_hash: H256,
	/// Identifier of the chain the metadata was fetched from.
	pub chain_id: String,
	/// Unix timestamp (milliseconds) of the fetch; newest entries win.
	pub time: i64,
	/// The raw metadata bytes.
	pub data: Vec<u8>,
}

/// SQLite-backed store for the script buffer and the metadata cache.
pub struct ConsoleStore {
	pool: SqlitePool,
}

impl ConsoleStore {
	/// Open or create the store database at the specified path.
	///
	/// Creates the parent directory if it doesn't exist.
	pub async fn open(path: &Path) -> Result<Self, StoreError> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let url = format!("sqlite:{}?mode=rwc", path.display());
		let pool = SqlitePoolOptions::new()
			.max_connections(MAX_POOL_CONNECTIONS)
			.connect(&url)
			.await?;
		sqlx::query(CREATE_TABLES_SQL).execute(&pool).await?;
		Ok(Self { pool })
	}

	/// Open an in-memory store (for testing).
	#[cfg(test)]
	pub async fn in_memory() -> Result<Self, StoreError> {
		let pool = SqlitePoolOptions::new()
			.max_connections(MEMORY_POOL_CONNECTIONS)
			.connect(SQLITE_MEMORY_URL)
			.await?;
		sqlx::query(CREATE_TABLES_SQL).execute(&pool).await?;
		Ok(Self { pool })
	}

	/// Read a persisted script body.
	pub async fn script(&self, name: &str) -> Result<Option<String>, StoreError> {
		let row = sqlx::query("SELECT body FROM scripts WHERE name = ?")
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|r| r.get("body")))
	}

	/// Persist a script body, replacing any previous one under the same name.
	pub async fn save_script(&self, name: &str, body: &str) -> Result<(), StoreError> {
		sqlx::query("INSERT OR REPLACE INTO scripts (name, body) VALUES (?, ?)")
			.bind(name)
			.bind(body)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Cache a metadata blob.
	///
	/// A previous entry for the same chain is superseded and the cache is
	/// pruned to the newest [`METADATA_CACHE_CAPACITY`] entries, all within
	/// one transaction.
	pub async fn cache_metadata(&self, entry: &MetadataCacheEntry) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM metadata_cache WHERE chain_id = ?")
			.bind(&entry.chain_id)
			.execute(&mut *tx)
			.await?;
		sqlx::query(
			"INSERT OR REPLACE INTO metadata_cache (code_hash, chain_id, time, data) VALUES (?, ?, ?, ?)",
		)
		.bind(entry.code_hash.as_bytes())
		.bind(&entry.chain_id)
		.bind(entry.time)
		.bind(&entry.data)
		.execute(&mut *tx)
		.await?;
		sqlx::query(
			"DELETE FROM metadata_cache WHERE code_hash NOT IN \
			 (SELECT code_hash FROM metadata_cache ORDER BY time DESC LIMIT ?)",
		)
		.bind(METADATA_CACHE_CAPACITY)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(())
	}

	/// Look up cached metadata by the runtime code hash.
	pub async fn cached_metadata(
		&self,
		code_hash: H256,
	) -> Result<Option<MetadataCacheEntry>, StoreError> {
		let row = sqlx::query(
			"SELECT code_hash, chain_id, time, data FROM metadata_cache WHERE code_hash = ?",
		)
		.bind(code_hash.as_bytes())
		.fetch_optional(&self.pool)
		.await?;
		row.map(entry_from_row).transpose()
	}

	/// Look up the cached metadata most recently stored for a chain.
	pub async fn cached_metadata_for_chain(
		&self,
		chain_id: &str,
	) -> Result<Option<MetadataCacheEntry>, StoreError> {
		let row = sqlx::query(
			"SELECT code_hash, chain_id, time, data FROM metadata_cache \
			 WHERE chain_id = ? ORDER BY time DESC LIMIT 1",
		)
		.bind(chain_id)
		.fetch_optional(&self.pool)
		.await?;
		row.map(entry_from_row).transpose()
	}
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<MetadataCacheEntry, StoreError> {
	let code_hash: Vec<u8> = row.get("code_hash");
	if code_hash.len() != 32 {
		return Err(StoreError::DataCorruption(format!(
			"invalid code hash length: {}",
			code_hash.len()
		)));
	}
	Ok(MetadataCacheEntry {
		code_hash: H256::from_slice(&code_hash),
		chain_id: row.get("chain_id"),
		time: row.get("time"),
		data: row.get("data"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::strings::store::keys;
	use crate::testing::hash;

	fn entry(code: u64, chain_id: &str, time: i64) -> MetadataCacheEntry {
		MetadataCacheEntry {
			code_hash: hash(code),
			chain_id: chain_id.to_string(),
			time,
			data: code.to_be_bytes().to_vec(),
		}
	}

	#[tokio::test]
	async fn script_round_trip() {
		let store = ConsoleStore::in_memory().await.unwrap();
		assert_eq!(store.script(keys::SCRIPT).await.unwrap(), None);

		store.save_script(keys::SCRIPT, "console.log(1);").await.unwrap();
		assert_eq!(
			store.script(keys::SCRIPT).await.unwrap().as_deref(),
			Some("console.log(1);")
		);

		// Saving again replaces the previous body.
		store.save_script(keys::SCRIPT, "console.log(2);").await.unwrap();
		assert_eq!(
			store.script(keys::SCRIPT).await.unwrap().as_deref(),
			Some("console.log(2);")
		);
	}

	#[tokio::test]
	async fn metadata_round_trip() {
		let store = ConsoleStore::in_memory().await.unwrap();
		let entry = entry(1, "polkadot", 100);
		store.cache_metadata(&entry).await.unwrap();

		assert_eq!(store.cached_metadata(entry.code_hash).await.unwrap(), Some(entry.clone()));
		assert_eq!(store.cached_metadata_for_chain("polkadot").await.unwrap(), Some(entry));
		assert_eq!(store.cached_metadata(hash(99)).await.unwrap(), None);
	}

	#[tokio::test]
	async fn same_chain_entry_is_superseded() {
		let store = ConsoleStore::in_memory().await.unwrap();
		let old = entry(1, "polkadot", 100);
		let new = entry(2, "polkadot", 200);
		store.cache_metadata(&old).await.unwrap();
		store.cache_metadata(&new).await.unwrap();

		assert_eq!(store.cached_metadata(old.code_hash).await.unwrap(), None);
		assert_eq!(store.cached_metadata_for_chain("polkadot").await.unwrap(), Some(new));
	}

	#[tokio::test]
	async fn cache_is_pruned_to_newest_entries() {
		let store = ConsoleStore::in_memory().await.unwrap();
		for (i, chain) in ["a", "b", "c", "d"].iter().enumerate() {
			store.cache_metadata(&entry(i as u64 + 1, chain, (i as i64 + 1) * 100)).await.unwrap();
		}

		// The oldest of the four entries is gone, the newest three remain.
		assert_eq!(store.cached_metadata(hash(1)).await.unwrap(), None);
		for code in [2, 3, 4] {
			assert!(store.cached_metadata(hash(code)).await.unwrap().is_some());
		}
	}
}
