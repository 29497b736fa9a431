//! The boundary to the downstream alert pipeline (deduplication, inhibition,
//! enrichment, storage, publishing). The ingestion handler only knows the
//! [AlertProcessor] trait.

use std::fmt;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::{
	sync::mpsc,
	time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::alert::CanonicalAlert;

/// why a [RequestContext] is done
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoneReason {
	/// the request was cancelled, e.g. the client went away
	Cancelled,
	/// the dispatch deadline has passed
	DeadlineExceeded,
}

impl fmt::Display for DoneReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DoneReason::Cancelled => f.write_str("request cancelled"),
			DoneReason::DeadlineExceeded => f.write_str("deadline exceeded"),
		}
	}
}

/// cancellation and deadline of a single request, passed into every
/// downstream call
#[derive(Clone, Debug)]
pub struct RequestContext {
	cancel: CancellationToken,
	deadline: Instant,
}

impl RequestContext {
	pub fn new(cancel: CancellationToken, deadline: Instant) -> Self {
		Self { cancel, deadline }
	}

	/// Returns the reason if the context is already done.
	pub fn done_reason(&self) -> Option<DoneReason> {
		if self.cancel.is_cancelled() {
			Some(DoneReason::Cancelled)
		} else if Instant::now() >= self.deadline {
			Some(DoneReason::DeadlineExceeded)
		} else {
			None
		}
	}

	/// Completes once the request is cancelled or the deadline passes.
	pub async fn done(&self) -> DoneReason {
		tokio::select! {
			biased;
			_ = self.cancel.cancelled() => DoneReason::Cancelled,
			_ = sleep_until(self.deadline) => DoneReason::DeadlineExceeded,
		}
	}
}

/// the downstream alert pipeline
#[async_trait]
pub trait AlertProcessor: Send + Sync {
	/// Processes a single canonical alert. Errors are recorded per alert by
	/// the caller and never retried.
	async fn process_alert(&self, ctx: &RequestContext, alert: &CanonicalAlert) -> Result<()>;

	/// false if the processor can't take any alerts at the moment
	async fn is_ready(&self) -> bool {
		true
	}
}

/// Processor handing alerts to a consumer task over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProcessor {
	tx: mpsc::Sender<CanonicalAlert>,
}

impl ChannelProcessor {
	pub fn new(tx: mpsc::Sender<CanonicalAlert>) -> Self {
		Self { tx }
	}
}

#[async_trait]
impl AlertProcessor for ChannelProcessor {
	async fn process_alert(&self, ctx: &RequestContext, alert: &CanonicalAlert) -> Result<()> {
		tokio::select! {
			sent = self.tx.send(alert.clone()) => sent.map_err(|_| anyhow!("alert pipeline is closed")),
			reason = ctx.done() => Err(anyhow!("alert pipeline is full: {reason}")),
		}
	}

	async fn is_ready(&self) -> bool {
		!self.tx.is_closed()
	}
}

/// Consumer end of a [ChannelProcessor], logs every alert it receives.
pub async fn run_alert_sink(mut rx: mpsc::Receiver<CanonicalAlert>) {
	while let Some(alert) = rx.recv().await {
		tracing::info!(
			fingerprint = %alert.fingerprint,
			alertname = %alert.alert_name,
			status = alert.status.as_str(),
			source = alert.source.as_str(),
			"accepted alert"
		);
	}
}
