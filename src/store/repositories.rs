use super::{InsertOutcome, StoreError};
use crate::models::{CanonicalTransaction, Chain, DedupKey, WalletChainState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Repository for canonical transactions, unique per (hash, wallet, token)
#[async_trait::async_trait]
pub trait TransactionRepository: Send + Sync {
	/// Return the subset of `keys` already stored for `chain`.
	async fn find_existing(
		&self,
		chain: Chain,
		keys: &[DedupKey],
	) -> Result<HashSet<DedupKey>, StoreError>;

	/// Insert every record independently. A duplicate key never aborts the remaining inserts.
	///
	/// Returns one outcome per input record, in order.
	async fn insert_unordered(
		&self,
		records: &[CanonicalTransaction],
	) -> Result<Vec<InsertOutcome>, StoreError>;

	async fn list_for_wallet(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Vec<CanonicalTransaction>, StoreError>;
}

/// Repository for per-(wallet, chain) state
#[async_trait::async_trait]
pub trait WalletStateRepository: Send + Sync {
	async fn load(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Option<WalletChainState>, StoreError>;

	/// Create or update a state. The stored checkpoint never decreases.
	///
	/// Returns the state as stored.
	async fn upsert(&self, state: &WalletChainState) -> Result<WalletChainState, StoreError>;

	/// Addresses with stored state on `chain`
	async fn list_addresses(&self, chain: Chain) -> Result<Vec<String>, StoreError>;
}

/// Merge an incoming state into the stored one, keeping the higher checkpoint.
pub(crate) fn merge_state(
	existing: Option<&WalletChainState>,
	incoming: &WalletChainState,
) -> WalletChainState {
	let mut merged = incoming.clone();
	merged.address = incoming.chain.normalize_address(&incoming.address);
	if let Some(existing) = existing {
		merged.checkpoint = existing.checkpoint.max(incoming.checkpoint);
		if merged.last_fetched.is_none() {
			merged.last_fetched = existing.last_fetched;
		}
	}
	merged
}

/// Replace `path` with `content` via a synced temp file and a rename, so readers see either
/// the old file or the new one, never a truncated write.
async fn write_replacing(path: &Path, content: &[u8]) -> std::io::Result<()> {
	let tmp_path = path.with_extension("json.tmp");
	let mut tmp = tokio::fs::File::create(&tmp_path).await?;
	tmp.write_all(content).await?;
	tmp.sync_all().await?;
	drop(tmp);
	tokio::fs::rename(&tmp_path, path).await
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TransactionFile {
	#[serde(default)]
	updated_at: Option<DateTime<Utc>>,
	#[serde(default)]
	transactions: Vec<CanonicalTransaction>,
}

/// File-based implementation of TransactionRepository
///
/// One pretty-printed JSON file per (chain, wallet). Writes are serialized through a single lock
/// so the lookup and insert of one call cannot interleave with another writer.
pub struct FileTransactionRepository {
	data_dir: PathBuf,
	write_lock: Mutex<()>,
}

impl FileTransactionRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self {
			data_dir,
			write_lock: Mutex::new(()),
		}
	}

	fn get_transactions_filename(&self, chain: Chain, address: &str) -> PathBuf {
		self.data_dir.join(format!(
			"transactions_{}_{}.json",
			chain.code(),
			hex::encode(chain.normalize_address(address))
		))
	}

	async fn read_file(&self, path: &Path) -> Result<TransactionFile, StoreError> {
		match tokio::fs::read_to_string(path).await {
			Ok(content) => serde_json::from_str(&content).map_err(|e| {
				StoreError::Serialization(format!(
					"Failed to parse transaction file {:?}: {}",
					path, e
				))
			}),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TransactionFile::default()),
			Err(e) => Err(StoreError::Io(e)),
		}
	}

	async fn write_file(&self, path: &Path, file: &TransactionFile) -> Result<(), StoreError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;
		let content = serde_json::to_string_pretty(file)?;
		write_replacing(path, content.as_bytes()).await?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl TransactionRepository for FileTransactionRepository {
	async fn find_existing(
		&self,
		chain: Chain,
		keys: &[DedupKey],
	) -> Result<HashSet<DedupKey>, StoreError> {
		let _guard = self.write_lock.lock().await;

		let mut wallets: HashSet<&str> = HashSet::new();
		for key in keys {
			wallets.insert(key.wallet_address.as_str());
		}

		let mut stored: HashSet<DedupKey> = HashSet::new();
		for wallet in wallets {
			let file = self
				.read_file(&self.get_transactions_filename(chain, wallet))
				.await?;
			stored.extend(file.transactions.iter().map(|tx| tx.dedup_key()));
		}

		Ok(keys.iter().filter(|k| stored.contains(k)).cloned().collect())
	}

	async fn insert_unordered(
		&self,
		records: &[CanonicalTransaction],
	) -> Result<Vec<InsertOutcome>, StoreError> {
		let _guard = self.write_lock.lock().await;

		// Group by target file, remembering each record's input position
		let mut groups: HashMap<PathBuf, Vec<usize>> = HashMap::new();
		for (index, record) in records.iter().enumerate() {
			let path = self.get_transactions_filename(record.chain, &record.wallet_address);
			groups.entry(path).or_default().push(index);
		}

		let mut outcomes = vec![InsertOutcome::Duplicate; records.len()];
		for (path, indices) in groups {
			let mut file = self.read_file(&path).await?;
			let mut keys: HashSet<DedupKey> =
				file.transactions.iter().map(|tx| tx.dedup_key()).collect();

			let mut added = Vec::new();
			for index in indices {
				let record = &records[index];
				if keys.insert(record.dedup_key()) {
					file.transactions.push(record.clone());
					added.push(index);
				}
			}

			if added.is_empty() {
				continue;
			}

			file.updated_at = Some(Utc::now());
			match self.write_file(&path, &file).await {
				Ok(()) => {
					for index in &added {
						outcomes[*index] = InsertOutcome::Inserted;
					}
					debug!("Wrote {} new transactions to {:?}", added.len(), path);
				}
				Err(e) => {
					let reason = e.to_string();
					for index in &added {
						outcomes[*index] = InsertOutcome::Failed(reason.clone());
					}
				}
			}
		}

		Ok(outcomes)
	}

	async fn list_for_wallet(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Vec<CanonicalTransaction>, StoreError> {
		let file = self
			.read_file(&self.get_transactions_filename(chain, address))
			.await?;
		Ok(file.transactions)
	}
}

/// File-based implementation of WalletStateRepository
pub struct FileWalletStateRepository {
	data_dir: PathBuf,
	write_lock: Mutex<()>,
}

impl FileWalletStateRepository {
	const PREFIX: &'static str = "wallet_state_";

	pub fn new(data_dir: PathBuf) -> Self {
		Self {
			data_dir,
			write_lock: Mutex::new(()),
		}
	}

	fn get_wallet_filename(&self, chain: Chain, address: &str) -> PathBuf {
		self.data_dir.join(format!(
			"{}{}_{}.json",
			Self::PREFIX,
			chain.code(),
			hex::encode(chain.normalize_address(address))
		))
	}

	async fn read_state(&self, path: &Path) -> Result<Option<WalletChainState>, StoreError> {
		match tokio::fs::read_to_string(path).await {
			Ok(content) => {
				let state = serde_json::from_str(&content).map_err(|e| {
					StoreError::Serialization(format!(
						"Failed to parse wallet state {:?}: {}",
						path, e
					))
				})?;
				Ok(Some(state))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StoreError::Io(e)),
		}
	}
}

#[async_trait::async_trait]
impl WalletStateRepository for FileWalletStateRepository {
	async fn load(
		&self,
		chain: Chain,
		address: &str,
	) -> Result<Option<WalletChainState>, StoreError> {
		self.read_state(&self.get_wallet_filename(chain, address))
			.await
	}

	async fn upsert(&self, state: &WalletChainState) -> Result<WalletChainState, StoreError> {
		let _guard = self.write_lock.lock().await;

		let filename = self.get_wallet_filename(state.chain, &state.address);
		let existing = self.read_state(&filename).await?;
		let merged = merge_state(existing.as_ref(), state);

		tokio::fs::create_dir_all(&self.data_dir).await?;
		let content = serde_json::to_string_pretty(&merged)?;
		write_replacing(&filename, content.as_bytes()).await.map_err(|e| {
			StoreError::Backend(format!("Failed to write wallet state {:?}: {}", filename, e))
		})?;

		if existing.is_none() {
			info!(
				chain = %merged.chain,
				address = %merged.address,
				"Created wallet state"
			);
		}
		Ok(merged)
	}

	async fn list_addresses(&self, chain: Chain) -> Result<Vec<String>, StoreError> {
		let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StoreError::Io(e)),
		};

		let prefix = format!("{}{}_", Self::PREFIX, chain.code());
		let mut addresses = Vec::new();

		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
				continue;
			};
			let Some(encoded) = filename
				.strip_prefix(prefix.as_str())
				.and_then(|s| s.strip_suffix(".json"))
			else {
				continue;
			};
			if let Some(address) = hex::decode(encoded)
				.ok()
				.and_then(|bytes| String::from_utf8(bytes).ok())
			{
				addresses.push(address);
			}
		}

		addresses.sort();
		Ok(addresses)
	}
}
