use chain_activity_sync::adapters::SolanaRpcAdapter;
use chain_activity_sync::config::EngineConfig;
use chain_activity_sync::engine::ActivityEngine;
use chain_activity_sync::notify::{LogAlertSink, WebhookAlertSink};
use chain_activity_sync::store::{FileTransactionRepository, FileWalletStateRepository};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const CONFIG_ENV: &str = "ACTIVITY_SYNC_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config_path = std::env::var(CONFIG_ENV)
		.map(PathBuf::from)
		.unwrap_or_else(|_| PathBuf::from("config.toml"));
	let config = EngineConfig::load(&config_path).map_err(|e| {
		error!("Failed to load {}: {}", config_path.display(), e);
		e
	})?;

	info!("Starting chain activity sync, data in {}", config.engine.data_dir.display());

	let data_dir = config.engine.data_dir.clone();
	let mut builder = ActivityEngine::builder()
		.with_transaction_repository(Arc::new(FileTransactionRepository::new(data_dir.clone())))
		.with_wallet_state_repository(Arc::new(FileWalletStateRepository::new(data_dir)))
		.with_retry_policy(config.retry_policy())
		.with_scheduler_settings(config.scheduler_settings())
		.with_subscription_settings(config.subscription_settings());

	if config.solana.enabled {
		let adapter = SolanaRpcAdapter::new(config.solana_settings())?;
		info!("Solana adapter using {}", config.solana.rpc_url);
		builder = builder.with_adapter(Arc::new(adapter));
	}

	builder = match &config.alerts.webhook_url {
		Some(_) => builder.with_alert_sink(Arc::new(WebhookAlertSink::new(
			config.alerts.items_per_message,
		)?)),
		None => {
			info!("No webhook configured, alerts go to the log");
			builder.with_alert_sink(Arc::new(LogAlertSink))
		}
	};

	let engine = builder.build();

	for (chain, address, target) in config.seed_monitors()? {
		match engine.start_monitoring(&address, chain, target).await {
			Ok(monitor) => info!(chain = %chain, "Monitoring {}", monitor.address),
			Err(e) => warn!(chain = %chain, "Could not monitor {}: {}", address, e),
		}
	}

	let handle = engine.spawn();
	info!("Engine running, press Ctrl-C to stop");

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}

	info!("Shutting down");
	handle.shutdown().await;
	Ok(())
}
