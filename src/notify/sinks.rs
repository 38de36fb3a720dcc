use super::{AlertError, AlertSink, DEFAULT_ITEMS_PER_MESSAGE};
use crate::models::CanonicalTransaction;

use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

/// Posts each batch as JSON to the webhook URL given as the alert target.
pub struct WebhookAlertSink {
	http_client: Client,
	items_per_message: usize,
}

impl WebhookAlertSink {
	pub fn new(items_per_message: usize) -> Result<Self, AlertError> {
		let http_client = Client::builder().timeout(Duration::from_secs(15)).build()?;
		Ok(Self {
			http_client,
			items_per_message: items_per_message.max(1),
		})
	}
}

#[derive(Serialize)]
struct AlertItem<'a> {
	chain: &'a str,
	wallet: &'a str,
	hash: &'a str,
	token: &'a str,
	method: &'a str,
	direction: Value,
	amount: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	amount_quote: Option<&'a str>,
	from: &'a str,
	to: &'a str,
	block: &'a str,
	timestamp: u64,
	status: Value,
}

fn build_payload(batch: &[CanonicalTransaction]) -> Value {
	let items: Vec<AlertItem<'_>> = batch
		.iter()
		.map(|tx| AlertItem {
			chain: tx.chain.code(),
			wallet: &tx.wallet_address,
			hash: &tx.hash,
			token: &tx.token,
			method: &tx.method,
			direction: json!(tx.direction),
			amount: &tx.amount,
			amount_quote: tx.amount_quote.as_deref(),
			from: &tx.from,
			to: &tx.to,
			block: &tx.block,
			timestamp: tx.timestamp,
			status: json!(tx.status),
		})
		.collect();

	json!({
		"count": items.len(),
		"transactions": items,
	})
}

#[async_trait::async_trait]
impl AlertSink for WebhookAlertSink {
	fn max_items_per_message(&self) -> usize {
		self.items_per_message
	}

	async fn deliver(
		&self,
		target: &str,
		batch: &[CanonicalTransaction],
	) -> Result<(), AlertError> {
		let url = Url::parse(target)
			.map_err(|e| AlertError::InvalidTarget(format!("{}: {}", target, e)))?;

		let response = self
			.http_client
			.post(url)
			.json(&build_payload(batch))
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(AlertError::Rejected {
				status: status.as_u16(),
				body,
			});
		}

		debug!("Webhook accepted batch of {}", batch.len());
		Ok(())
	}

	fn name(&self) -> &'static str {
		"webhook"
	}
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait::async_trait]
impl AlertSink for LogAlertSink {
	fn max_items_per_message(&self) -> usize {
		DEFAULT_ITEMS_PER_MESSAGE
	}

	async fn deliver(
		&self,
		target: &str,
		batch: &[CanonicalTransaction],
	) -> Result<(), AlertError> {
		for tx in batch {
			info!(
				target_name = %target,
				chain = %tx.chain,
				wallet = %tx.wallet_address,
				"New {} {} {} in {}",
				tx.method,
				tx.amount,
				tx.token,
				tx.hash
			);
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"log"
	}
}
