//! Solana JSON-RPC adapter with account-activity push support.
//!
//! Balances and signature history are fetched over HTTP JSON-RPC. Push notifications use the
//! `accountSubscribe` WebSocket method; every `accountNotification` is forwarded to the engine's
//! activity callback, and the stream reconnects on its own when the socket drops.

use super::{
	ActivityCallback, AdapterError, BalanceSnapshot, ChainAdapter, FetchBatch, SubscriptionHandle,
};
use crate::models::{CanonicalTransaction, Chain, Direction, TxCategory, TxStatus};
use crate::utils::format_token_amount;

use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Lamports per SOL
const SOL_DECIMALS: u32 = 9;
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

type AccountStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for the Solana adapter
#[derive(Debug, Clone)]
pub struct SolanaSettings {
	pub rpc_url: String,
	/// Derived from `rpc_url` when absent
	pub ws_url: Option<String>,
	/// Signatures requested per page (RPC maximum is 1000)
	pub signature_limit: usize,
	/// Pages walked backwards on the first fetch of an address (no checkpoint yet)
	pub max_pages: usize,
	/// Hard cap on pages walked backwards looking for a known checkpoint.
	///
	/// If the checkpoint is still not reached after this many pages, the signatures between it
	/// and the oldest fetched page are never fetched: the checkpoint moves past them.
	pub max_catchup_pages: usize,
	pub page_delay: Duration,
	pub reconnect_delay: Duration,
}

impl Default for SolanaSettings {
	fn default() -> Self {
		Self {
			rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
			ws_url: None,
			signature_limit: 50,
			max_pages: 2,
			max_catchup_pages: 20,
			page_delay: Duration::from_millis(200),
			reconnect_delay: Duration::from_secs(5),
		}
	}
}

/// One entry of a `getSignaturesForAddress` response
#[derive(Debug, Clone, Deserialize)]
struct SignatureInfo {
	signature: String,
	slot: u64,
	#[serde(default)]
	err: Option<Value>,
	#[serde(rename = "blockTime", default)]
	block_time: Option<i64>,
	#[serde(rename = "confirmationStatus", default)]
	confirmation_status: Option<String>,
}

/// Solana adapter backed by a JSON-RPC node
pub struct SolanaRpcAdapter {
	/// The underlying HTTP client for RPC calls.
	http_client: Client,
	rpc_url: String,
	ws_url: String,
	settings: SolanaSettings,
	next_handle: AtomicU64,
	/// Live account streams keyed by handle id
	subscriptions: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SolanaRpcAdapter {
	/// Create a new adapter.
	///
	/// # Errors
	/// Returns `AdapterError::Unavailable` if the HTTP client cannot be built.
	pub fn new(settings: SolanaSettings) -> Result<Self, AdapterError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.map_err(|e| AdapterError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

		let rpc_url = settings.rpc_url.trim_end_matches('/').to_string();
		let ws_url = settings
			.ws_url
			.clone()
			.unwrap_or_else(|| derive_ws_url(&rpc_url));

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			settings,
			next_handle: AtomicU64::new(1),
			subscriptions: Mutex::new(HashMap::new()),
		})
	}

	/// Execute a JSON-RPC call and return its `result`.
	async fn execute_rpc(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if response.status() == StatusCode::TOO_MANY_REQUESTS {
			let retry_after = response
				.headers()
				.get(RETRY_AFTER)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.trim().parse::<u64>().ok())
				.map(Duration::from_secs);
			return Err(AdapterError::RateLimited { retry_after });
		}

		if !response.status().is_success() {
			return Err(AdapterError::Unavailable(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let response_json: Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			return Err(classify_rpc_error(error));
		}

		response_json
			.get("result")
			.cloned()
			.ok_or_else(|| AdapterError::Unavailable(format!("{} returned no result", method)))
	}

	async fn fetch_signature_page(
		&self,
		address: &str,
		before: Option<&str>,
	) -> Result<Vec<SignatureInfo>, AdapterError> {
		let mut options = json!({
			"limit": self.settings.signature_limit,
			"commitment": "confirmed",
		});
		if let Some(before) = before {
			options["before"] = json!(before);
		}

		let result = self
			.execute_rpc("getSignaturesForAddress", json!([address, options]))
			.await?;
		Ok(serde_json::from_value(result)?)
	}
}

/// Signatures newer than the checkpoint, newest first
struct SignatureWalk {
	collected: Vec<SignatureInfo>,
	reached_checkpoint: bool,
}

/// Walk signature pages backwards from the newest until the checkpoint or the page budget is hit.
///
/// Without a checkpoint only `max_pages` are read. With one, pages are read until a signature at
/// or below it shows up, capped at `max_catchup_pages`.
async fn walk_signature_pages<F, Fut>(
	settings: &SolanaSettings,
	checkpoint: Option<u64>,
	mut fetch_page: F,
) -> Result<SignatureWalk, AdapterError>
where
	F: FnMut(Option<String>) -> Fut,
	Fut: Future<Output = Result<Vec<SignatureInfo>, AdapterError>>,
{
	let page_budget = match checkpoint {
		None => settings.max_pages,
		Some(_) => settings.max_catchup_pages.max(settings.max_pages),
	}
	.max(1);

	let mut collected: Vec<SignatureInfo> = Vec::new();
	let mut before: Option<String> = None;
	let mut reached_checkpoint = checkpoint.is_none();

	for page in 0..page_budget {
		if page > 0 {
			tokio::time::sleep(settings.page_delay).await;
		}

		let batch = fetch_page(before.clone()).await?;
		let page_len = batch.len();
		before = batch.last().map(|info| info.signature.clone());

		for info in batch {
			if checkpoint.is_some_and(|c| info.slot <= c) {
				reached_checkpoint = true;
				continue;
			}
			if collected.iter().all(|s| s.signature != info.signature) {
				collected.push(info);
			}
		}

		if checkpoint.is_some() && reached_checkpoint {
			break;
		}
		if page_len < settings.signature_limit {
			// History exhausted
			reached_checkpoint = true;
			break;
		}
	}

	Ok(SignatureWalk {
		collected,
		reached_checkpoint,
	})
}

#[async_trait::async_trait]
impl ChainAdapter for SolanaRpcAdapter {
	fn chain(&self) -> Chain {
		Chain::Solana
	}

	fn validate_address(&self, address: &str) -> Result<(), AdapterError> {
		validate_base58_address(address)
	}

	async fn fetch_balance(&self, address: &str) -> Result<BalanceSnapshot, AdapterError> {
		let result = self
			.execute_rpc("getBalance", json!([address, { "commitment": "confirmed" }]))
			.await?;

		let lamports = result
			.get("value")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| AdapterError::Unavailable("getBalance returned no value".to_string()))?;

		Ok(BalanceSnapshot {
			balance: format_token_amount(lamports as u128, SOL_DECIMALS),
			value_in_quote: None,
		})
	}

	async fn fetch_transactions_since(
		&self,
		address: &str,
		checkpoint: Option<u64>,
	) -> Result<FetchBatch, AdapterError> {
		let fetch_page = move |before: Option<String>| async move {
			self.fetch_signature_page(address, before.as_deref()).await
		};
		let SignatureWalk {
			mut collected,
			reached_checkpoint,
		} = walk_signature_pages(&self.settings, checkpoint, fetch_page).await?;

		if !reached_checkpoint {
			warn!(
				"Signature history for {} exceeds {} pages; activity between slot {:?} and the oldest fetched page is skipped",
				address,
				self.settings.max_catchup_pages,
				checkpoint
			);
		}

		// RPC returns newest first
		collected.reverse();
		let new_checkpoint = collected.iter().map(|info| info.slot).max();
		let records = collected
			.iter()
			.map(|info| normalize_signature(address, info))
			.collect::<Vec<_>>();

		debug!(
			"Fetched {} Solana signatures for {} since slot {:?}",
			records.len(),
			address,
			checkpoint
		);

		Ok(FetchBatch {
			records,
			new_checkpoint,
		})
	}

	fn checkpoint_of(&self, record: &CanonicalTransaction) -> u64 {
		record.block.parse::<u64>().unwrap_or(0)
	}

	fn supports_push(&self) -> bool {
		true
	}

	async fn subscribe(
		&self,
		address: &str,
		on_activity: ActivityCallback,
	) -> Result<SubscriptionHandle, AdapterError> {
		let stream = open_account_stream(&self.ws_url, address).await?;
		let id = self.next_handle.fetch_add(1, Ordering::SeqCst);

		let task = tokio::spawn(run_account_stream(
			self.ws_url.clone(),
			address.to_string(),
			stream,
			on_activity,
			self.settings.reconnect_delay,
		));

		self.subscriptions
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.insert(id, task);

		info!("Subscribed to Solana account activity for {}", address);
		Ok(SubscriptionHandle(id))
	}

	async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), AdapterError> {
		let task = self
			.subscriptions
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.remove(&handle.0);

		match task {
			Some(task) => {
				task.abort();
				debug!("Closed Solana account stream {}", handle.0);
			}
			None => debug!("Solana account stream {} already closed", handle.0),
		}
		Ok(())
	}
}

/// Connect, send `accountSubscribe`, and wait for the subscription id.
async fn open_account_stream(ws_url: &str, address: &str) -> Result<AccountStream, AdapterError> {
	debug!("Attempting WebSocket connection to: {}", ws_url);
	let (mut ws_stream, response) = connect_async(ws_url).await?;
	debug!(
		"WebSocket connection established, response status: {}",
		response.status()
	);

	let subscribe_message = json!({
		"jsonrpc": "2.0",
		"id": 1,
		"method": "accountSubscribe",
		"params": [address, { "encoding": "jsonParsed", "commitment": "confirmed" }],
	});
	ws_stream
		.send(Message::Text(subscribe_message.to_string()))
		.await?;

	while let Some(msg) = ws_stream.next().await {
		match msg? {
			Message::Text(text) => {
				let parsed: Value = serde_json::from_str(&text)?;
				if let Some(error) = parsed.get("error") {
					return Err(classify_rpc_error(error));
				}
				if parsed.get("id") == Some(&json!(1)) && parsed.get("result").is_some() {
					return Ok(ws_stream);
				}
			}
			Message::Ping(payload) => ws_stream.send(Message::Pong(payload)).await?,
			Message::Close(_) => break,
			_ => {}
		}
	}

	Err(AdapterError::Unavailable(
		"WebSocket closed before the subscription was confirmed".to_string(),
	))
}

/// Forward notifications until the socket drops, then reconnect.
async fn run_account_stream(
	ws_url: String,
	address: String,
	mut ws_stream: AccountStream,
	on_activity: ActivityCallback,
	reconnect_delay: Duration,
) {
	loop {
		while let Some(msg) = ws_stream.next().await {
			match msg {
				Ok(Message::Text(text)) => {
					if is_account_notification(&text) {
						on_activity();
					}
				}
				Ok(Message::Ping(payload)) => {
					if let Err(e) = ws_stream.send(Message::Pong(payload)).await {
						warn!("Failed to answer ping on account stream for {}: {}", address, e);
						break;
					}
				}
				Ok(Message::Close(_)) => break,
				Ok(_) => {}
				Err(e) => {
					warn!("Account stream error for {}: {}", address, e);
					break;
				}
			}
		}

		warn!(
			"Account stream for {} closed, reconnecting in {:?}",
			address, reconnect_delay
		);

		loop {
			tokio::time::sleep(reconnect_delay).await;
			match open_account_stream(&ws_url, &address).await {
				Ok(stream) => {
					ws_stream = stream;
					info!("Reconnected account stream for {}", address);
					// Activity may have happened while disconnected
					on_activity();
					break;
				}
				Err(e) => warn!("Reconnect for {} failed: {}", address, e),
			}
		}
	}
}

fn derive_ws_url(rpc_url: &str) -> String {
	if let Some(rest) = rpc_url.strip_prefix("https://") {
		format!("wss://{}", rest)
	} else if let Some(rest) = rpc_url.strip_prefix("http://") {
		format!("ws://{}", rest)
	} else {
		rpc_url.to_string()
	}
}

fn classify_rpc_error(error: &Value) -> AdapterError {
	let code = error.get("code").and_then(|c| c.as_i64());
	let message = error
		.get("message")
		.and_then(|m| m.as_str())
		.unwrap_or("Unknown RPC error");
	let lowered = message.to_lowercase();

	if code == Some(429) || lowered.contains("429") || lowered.contains("too many request") {
		AdapterError::RateLimited { retry_after: None }
	} else if lowered.contains("invalid param") {
		AdapterError::InvalidAddress(message.to_string())
	} else {
		AdapterError::Unavailable(format!("RPC error: {}", message))
	}
}

fn is_account_notification(text: &str) -> bool {
	serde_json::from_str::<Value>(text)
		.ok()
		.and_then(|v| v.get("method").and_then(|m| m.as_str()).map(|m| m == "accountNotification"))
		.unwrap_or(false)
}

fn validate_base58_address(address: &str) -> Result<(), AdapterError> {
	let trimmed = address.trim();
	if !(32..=44).contains(&trimmed.len()) {
		return Err(AdapterError::InvalidAddress(format!(
			"expected 32-44 base58 characters, got {}",
			trimmed.len()
		)));
	}
	if let Some(bad) = trimmed.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
		return Err(AdapterError::InvalidAddress(format!(
			"'{}' is not a base58 character",
			bad
		)));
	}
	Ok(())
}

/// Signature-level record; instruction parsing is left to richer adapters.
fn normalize_signature(address: &str, info: &SignatureInfo) -> CanonicalTransaction {
	let status = if info.err.as_ref().is_some_and(|e| !e.is_null()) {
		TxStatus::Failed
	} else if info.confirmation_status.as_deref() == Some("processed") {
		TxStatus::Pending
	} else {
		TxStatus::Confirmed
	};

	CanonicalTransaction {
		chain: Chain::Solana,
		wallet_address: address.to_string(),
		hash: info.signature.clone(),
		token: Chain::Solana.native_symbol().to_string(),
		category: TxCategory::Native,
		method: "Transfer".to_string(),
		block: info.slot.to_string(),
		timestamp: info.block_time.map(|t| t.max(0) as u64).unwrap_or(0),
		from: String::new(),
		to: String::new(),
		direction: Direction::Any,
		amount: String::new(),
		amount_quote: None,
		fee: None,
		status,
	}
}
