//! prometheus meters for the ingestion pipeline

use std::time::Duration;

use prometheus::{
	exponential_buckets, histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};

use crate::detect::WireFormat;

/// namespace of every meter exported by this service
const NAMESPACE: &str = "alert_ingest";

#[derive(Debug, Clone)]
/// prometheus meters for [IngestionHandler](crate::ingest::IngestionHandler)
pub struct IngestMetrics {
	/// alerts that made it to the dispatch stage
	alerts_received: IntCounter,
	/// alerts accepted by the downstream processor
	alerts_processed: IntCounter,
	/// alerts rejected by the downstream processor or cancelled
	alerts_failed: IntCounter,
	/// requests by HTTP status code
	requests: IntCounterVec,
	/// format detection outcome
	detected_formats: IntCounterVec,
	/// time spent in each pipeline stage
	stage_duration: HistogramVec,
}

impl IngestMetrics {
	/// construct prometheus meters and register them with `registry`
	pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
		let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
			let counter = IntCounter::with_opts(opts!(name, help).namespace(NAMESPACE).subsystem("alerts"))?;
			registry.register(Box::new(counter.clone()))?;
			Ok(counter)
		};

		let alerts_received = counter("received_total", "alerts handed to the dispatch stage")?;
		let alerts_processed = counter("processed_total", "alerts accepted by the alert processor")?;
		let alerts_failed = counter("failed_total", "alerts that failed or were cancelled during dispatch")?;

		let requests = IntCounterVec::new(
			opts!("requests_total", "ingestion requests by response status")
				.namespace(NAMESPACE)
				.subsystem("http"),
			&["status"],
		)?;
		registry.register(Box::new(requests.clone()))?;

		let detected_formats = IntCounterVec::new(
			opts!("detected_formats_total", "payloads by detected wire format")
				.namespace(NAMESPACE)
				.subsystem("pipeline"),
			&["format"],
		)?;
		registry.register(Box::new(detected_formats.clone()))?;

		let stage_duration = HistogramVec::new(
			histogram_opts!(
				"stage_duration_seconds",
				"time spent in each ingestion stage",
				exponential_buckets(0.0001, 4., 10)?
			)
			.namespace(NAMESPACE)
			.subsystem("pipeline"),
			&["stage"],
		)?;
		registry.register(Box::new(stage_duration.clone()))?;

		Ok(Self {
			alerts_received,
			alerts_processed,
			alerts_failed,
			requests,
			detected_formats,
			stage_duration,
		})
	}

	/// meters registered with a throwaway registry
	#[cfg(test)]
	pub fn unregistered() -> Self {
		#[allow(clippy::expect_used)]
		Self::new(&Registry::new()).expect("meters register with a fresh registry")
	}

	pub fn record_detection(&self, format: WireFormat) {
		self.detected_formats.with_label_values(&[format.as_str()]).inc();
	}

	pub fn record_stage(&self, stage: &str, duration: Duration) {
		self.stage_duration.with_label_values(&[stage]).observe(duration.as_secs_f64());
	}

	pub fn record_request(&self, status: u16) {
		self.requests.with_label_values(&[&status.to_string()]).inc();
	}

	/// counts the outcome of one dispatch stage
	pub fn record_outcome(&self, received: usize, processed: usize, failed: usize) {
		self.alerts_received.inc_by(received as u64);
		self.alerts_processed.inc_by(processed as u64);
		self.alerts_failed.inc_by(failed as u64);
	}
}
