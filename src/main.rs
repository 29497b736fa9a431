//! alert ingestion front end for an Alertmanager compatible pipeline
//!
//! Features:
//! - accepts Prometheus rule alerts (flat array or grouped) and Alertmanager
//!   notifier webhooks on one endpoint and detects the format by shape
//! - normalizes every format into one canonical alert with a stable
//!   fingerprint
//! - dispatches alerts one by one and reports partial failures with 207
use std::sync::Arc;

use anyhow::{Context, Result};
use settings::Settings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
	alertmanager_webhook_receiver::AlertReceiverSettings,
	ingest::IngestionHandler,
	metrics::IngestMetrics,
	parser::ParserRegistry,
	processor::ChannelProcessor,
};

mod alert;
mod alertmanager_webhook_receiver;
mod detect;
mod fingerprint;
mod ingest;
mod log;
mod metrics;
mod parser;
mod processor;
mod settings;
mod telemetry_endpoint;
mod validate;

/// exit the complete program if one thread panics
fn setup_panic_handler() {
	let default_panic = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		default_panic(info);
		std::process::exit(1);
	}));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
	setup_panic_handler();

	log::setup_logging().context("could not setup logging")?;

	let receiver_settings = AlertReceiverSettings::global();
	let limits = receiver_settings.limits();

	let metrics = IngestMetrics::new(prometheus::default_registry())
		.context("failed to register ingestion metrics")?;

	let registry = Arc::new(ParserRegistry::new(limits.max_alerts, receiver_settings.native_webhook_parser));

	let (tx_pipeline, rx_pipeline) = mpsc::channel(Settings::global().pipeline.queue_capacity);
	let pipeline = Arc::new(ChannelProcessor::new(tx_pipeline));

	let handler = Arc::new(IngestionHandler::new(registry, pipeline, limits, metrics));

	tokio::spawn(processor::run_alert_sink(rx_pipeline));

	let shutdown = CancellationToken::new();

	tokio::spawn({
		let shutdown = shutdown.clone();
		async move {
			match tokio::signal::ctrl_c().await {
				Ok(()) => {
					tracing::info!("received ctrl-c, shutting down");
					shutdown.cancel();
				}
				Err(err) => tracing::error!("failed to listen for ctrl-c: {}", err),
			}
		}
	});

	let signal = |token: CancellationToken| async move { token.cancelled().await };

	let receiver =
		alertmanager_webhook_receiver::run_alert_receiver(handler, signal(shutdown.clone()));
	let telemetry = telemetry_endpoint::run_telemetry_endpoint(signal(shutdown));

	tokio::try_join!(receiver, telemetry)?;

	Ok(())
}
