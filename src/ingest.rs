//! The ingestion handler: turns one HTTP request into canonical alerts and
//! hands them to the [AlertProcessor] one by one.
//!
//! A request walks through the stages
//! `ReceivingBody → Detecting → Parsing → Validating → Converting → Dispatching → Responding`.
//! Any failure up to and including `Converting` aborts the request before a
//! single alert reaches the processor. Failures while dispatching only affect
//! the alert at hand; the remaining alerts are still dispatched and the
//! response reports success, partial success (207) or failure per alert.

use std::{sync::Arc, time::Duration};

use axum::{
	body::{Bytes, HttpBody},
	response::{IntoResponse, Response},
	Json,
};
use bytes::BytesMut;
use chrono::{SecondsFormat, Utc};
use futures::{stream, StreamExt};
use http::{
	header::{ALLOW, CONTENT_LENGTH},
	HeaderMap, HeaderValue, Method, StatusCode,
};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
	alert::CanonicalAlert,
	detect::{self, DetectionError, WireFormat},
	metrics::IngestMetrics,
	parser::{ConversionError, ParseError, ParserRegistry},
	processor::{AlertProcessor, DoneReason, RequestContext},
	validate::{ValidationIssue, ValidationResult},
};

/// stages of a single ingestion request, used as metric and log labels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
	ReceivingBody,
	Detecting,
	Parsing,
	Validating,
	Converting,
	Dispatching,
}

impl Stage {
	pub fn as_str(&self) -> &'static str {
		match self {
			Stage::ReceivingBody => "receiving_body",
			Stage::Detecting => "detecting",
			Stage::Parsing => "parsing",
			Stage::Validating => "validating",
			Stage::Converting => "converting",
			Stage::Dispatching => "dispatching",
		}
	}
}

/// request limits of the ingestion endpoint
#[derive(Clone, Copy, Debug)]
pub struct IngestLimits {
	/// maximum request body size in bytes
	pub max_body_bytes: usize,
	/// maximum number of alerts per request after flattening
	pub max_alerts: usize,
	/// time budget for dispatching all alerts of a request
	pub dispatch_timeout: Duration,
}

/// Errors aborting a request before any alert is dispatched
#[derive(Error, Debug)]
pub enum IngestError {
	#[error("method {0} not allowed, use POST")]
	MethodNotAllowed(Method),
	#[error("request body exceeds the limit of {limit} bytes")]
	PayloadTooLarge { limit: usize },
	#[error("failed to read request body: {0}")]
	BodyRead(String),
	#[error(transparent)]
	Detection(#[from] DetectionError),
	#[error(transparent)]
	Parse(#[from] ParseError),
	#[error("{}", validation_message(.0))]
	Validation(ValidationResult),
	#[error(transparent)]
	Conversion(#[from] ConversionError),
	#[error("alert processor unavailable")]
	ProcessorUnavailable,
}

fn validation_message(result: &ValidationResult) -> &'static str {
	if result.exceeds_limit() {
		"too many alerts"
	} else {
		"validation failed"
	}
}

impl IngestError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			IngestError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
			IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
			IngestError::BodyRead(_) | IngestError::Detection(_) | IngestError::Parse(_) => {
				StatusCode::BAD_REQUEST
			}
			IngestError::Validation(result) if result.exceeds_limit() => StatusCode::PAYLOAD_TOO_LARGE,
			IngestError::Validation(_) => StatusCode::BAD_REQUEST,
			IngestError::Conversion(_) => StatusCode::UNPROCESSABLE_ENTITY,
			IngestError::ProcessorUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

/// Error of a single alert during dispatch, recorded but never propagated
#[derive(Error, Debug)]
pub enum DispatchError {
	#[error("{0:#}")]
	Processor(anyhow::Error),
	#[error("not processed: {0}")]
	Cancelled(DoneReason),
}

/// a failed alert of a dispatched batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
	/// position in the flattened alert list
	pub index: usize,
	pub fingerprint: String,
	pub alert_name: String,
	pub error: String,
}

/// result of dispatching every alert of a request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessingOutcome {
	pub received: usize,
	pub processed: usize,
	pub failed: usize,
	/// failures in dispatch order
	pub failures: Vec<FailureRecord>,
}

impl ProcessingOutcome {
	/// Folds the per alert results (in dispatch order) into an outcome.
	pub fn fold<I>(alerts: &[CanonicalAlert], results: I) -> Self
	where
		I: IntoIterator<Item = Result<(), DispatchError>>,
	{
		let initial = Self { received: alerts.len(), ..Self::default() };

		alerts.iter().zip(results).enumerate().fold(
			initial,
			|mut outcome, (index, (alert, result))| {
				match result {
					Ok(()) => outcome.processed += 1,
					Err(err) => {
						outcome.failed += 1;
						outcome.failures.push(FailureRecord {
							index,
							fingerprint: alert.fingerprint.clone(),
							alert_name: alert.alert_name.clone(),
							error: err.to_string(),
						});
					}
				}
				outcome
			},
		)
	}
}

/// `status` field of every response body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
	Success,
	Partial,
	Error,
}

/// counts of a dispatched request
#[derive(Clone, Debug, Serialize)]
pub struct OutcomeData {
	pub received: usize,
	pub processed: usize,
	#[serde(skip_serializing_if = "is_zero")]
	pub failed: usize,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<FailureRecord>,
	pub timestamp: String,
}

fn is_zero(n: &usize) -> bool {
	*n == 0
}

/// JSON body of every response of the ingestion endpoint
#[derive(Clone, Debug, Serialize)]
pub struct ResponseBody {
	pub status: ResponseStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<ValidationIssue>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<OutcomeData>,
}

/// status code together with the structured body
#[derive(Clone, Debug)]
pub struct IngestResponse {
	pub status: StatusCode,
	pub body: ResponseBody,
}

impl IngestResponse {
	/// 200 if every alert was processed, 207 if some were, 500 if none were
	pub fn from_outcome(outcome: ProcessingOutcome) -> Self {
		let (status, response_status, error) = match outcome.processed {
			n if n == outcome.received => (StatusCode::OK, ResponseStatus::Success, None),
			0 => (
				StatusCode::INTERNAL_SERVER_ERROR,
				ResponseStatus::Error,
				Some("all alerts failed processing".to_owned()),
			),
			_ => (StatusCode::MULTI_STATUS, ResponseStatus::Partial, None),
		};

		Self {
			status,
			body: ResponseBody {
				status: response_status,
				error,
				errors: Vec::new(),
				data: Some(OutcomeData {
					received: outcome.received,
					processed: outcome.processed,
					failed: outcome.failed,
					errors: outcome.failures,
					timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
				}),
			},
		}
	}

	pub fn from_error(err: IngestError) -> Self {
		let status = err.status_code();
		let error = Some(err.to_string());
		let errors = match err {
			IngestError::Validation(result) => result.errors,
			_ => Vec::new(),
		};

		Self { status, body: ResponseBody { status: ResponseStatus::Error, error, errors, data: None } }
	}
}

impl IntoResponse for IngestResponse {
	fn into_response(self) -> Response {
		let mut response = (self.status, Json(self.body)).into_response();
		if self.status == StatusCode::METHOD_NOT_ALLOWED {
			response.headers_mut().insert(ALLOW, HeaderValue::from_static("POST"));
		}
		response
	}
}

/// Reads the request body, refusing anything larger than `limit` bytes.
///
/// The declared `Content-Length` is checked up front, the read itself is
/// capped as well since the header may be missing or wrong.
pub async fn read_body<B>(headers: &HeaderMap, mut body: B, limit: usize) -> Result<Bytes, IngestError>
where
	B: HttpBody<Data = Bytes> + Unpin,
	B::Error: std::fmt::Display,
{
	let declared = headers
		.get(CONTENT_LENGTH)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.parse::<u64>().ok());

	if declared.map_or(false, |len| len > limit as u64) {
		return Err(IngestError::PayloadTooLarge { limit });
	}

	let mut buf = BytesMut::with_capacity(declared.map_or(0, |len| len as usize));
	while let Some(chunk) = body.data().await {
		let chunk = chunk.map_err(|err| IngestError::BodyRead(err.to_string()))?;
		if buf.len() + chunk.len() > limit {
			return Err(IngestError::PayloadTooLarge { limit });
		}
		buf.extend_from_slice(&chunk);
	}

	Ok(buf.freeze())
}

/// Orchestrates detection, parsing, validation, conversion and dispatch for
/// each request. Shared between requests, holds no per request state.
#[derive(Clone)]
pub struct IngestionHandler {
	registry: Arc<ParserRegistry>,
	processor: Arc<dyn AlertProcessor>,
	limits: IngestLimits,
	metrics: IngestMetrics,
}

impl IngestionHandler {
	pub fn new(
		registry: Arc<ParserRegistry>,
		processor: Arc<dyn AlertProcessor>,
		limits: IngestLimits,
		metrics: IngestMetrics,
	) -> Self {
		Self { registry, processor, limits, metrics }
	}

	/// a fresh context whose dispatch budget starts now
	fn context(&self, cancel: &CancellationToken) -> RequestContext {
		RequestContext::new(cancel.clone(), Instant::now() + self.limits.dispatch_timeout)
	}

	/// Handles one request and always produces a structured response.
	///
	/// `cancel` is cancelled once the client goes away, the dispatch deadline
	/// only starts counting when the first alert is dispatched.
	#[tracing::instrument(name = "ingest", skip_all, fields(method = %method))]
	pub async fn handle<B>(
		&self,
		method: &Method,
		headers: &HeaderMap,
		body: B,
		cancel: &CancellationToken,
	) -> IngestResponse
	where
		B: HttpBody<Data = Bytes> + Unpin,
		B::Error: std::fmt::Display,
	{
		let response = match self.ingest(method, headers, body, cancel).await {
			Ok(outcome) => {
				info!(
					received = outcome.received,
					processed = outcome.processed,
					failed = outcome.failed,
					"dispatched alerts"
				);
				IngestResponse::from_outcome(outcome)
			}
			Err(err) => {
				match err.status_code() {
					status if status.is_server_error() => warn!("rejected request: {}", err),
					_ => debug!("rejected request: {}", err),
				}
				IngestResponse::from_error(err)
			}
		};

		self.metrics.record_request(response.status.as_u16());
		response
	}

	async fn ingest<B>(
		&self,
		method: &Method,
		headers: &HeaderMap,
		body: B,
		cancel: &CancellationToken,
	) -> Result<ProcessingOutcome, IngestError>
	where
		B: HttpBody<Data = Bytes> + Unpin,
		B::Error: std::fmt::Display,
	{
		if method != Method::POST {
			return Err(IngestError::MethodNotAllowed(method.clone()));
		}

		let started = std::time::Instant::now();
		let payload = read_body(headers, body, self.limits.max_body_bytes).await;
		self.metrics.record_stage(Stage::ReceivingBody.as_str(), started.elapsed());

		let alerts = self.normalize(&payload?)?;

		if !self.processor.is_ready().await {
			return Err(IngestError::ProcessorUnavailable);
		}

		let ctx = self.context(cancel);
		let started = std::time::Instant::now();
		let outcome = self.dispatch(&ctx, &alerts).await;
		self.metrics.record_stage(Stage::Dispatching.as_str(), started.elapsed());
		self.metrics.record_outcome(outcome.received, outcome.processed, outcome.failed);

		Ok(outcome)
	}

	/// Runs every terminal-on-failure stage after the body has been read:
	/// detection, parsing, validation and conversion.
	pub fn normalize(&self, payload: &[u8]) -> Result<Vec<CanonicalAlert>, IngestError> {
		let format = self.stage(Stage::Detecting, || detect::detect(payload));
		self.metrics.record_detection(*format.as_ref().unwrap_or(&WireFormat::Unknown));
		let format = format?;

		let parser = self
			.registry
			.get(format)
			.ok_or(DetectionError::UnrecognizedShape("no parser for payload format"))?;

		debug!(format = format.as_str(), parser = parser.name(), "detected payload format");

		let webhook = self.stage(Stage::Parsing, || parser.parse(payload))?;

		let validation = self.stage(Stage::Validating, || parser.validate(&webhook));
		if !validation.valid {
			return Err(IngestError::Validation(validation));
		}

		debug!(
			source = webhook.source.as_str(),
			alerts = webhook.alerts.len(),
			group_key = webhook.group_key.as_deref().unwrap_or_default(),
			receiver = webhook.receiver.as_deref().unwrap_or_default(),
			"validated webhook"
		);

		self.stage(Stage::Converting, || parser.convert_to_domain(webhook)).map_err(IngestError::from)
	}

	/// Dispatches the alerts strictly in order. Failed alerts are recorded
	/// and skipped; once the context is done, every remaining alert is
	/// recorded as not processed without calling the processor.
	pub async fn dispatch(&self, ctx: &RequestContext, alerts: &[CanonicalAlert]) -> ProcessingOutcome {
		let results: Vec<Result<(), DispatchError>> =
			stream::iter(alerts).then(|alert| self.dispatch_one(ctx, alert)).collect().await;

		ProcessingOutcome::fold(alerts, results)
	}

	async fn dispatch_one(&self, ctx: &RequestContext, alert: &CanonicalAlert) -> Result<(), DispatchError> {
		if let Some(reason) = ctx.done_reason() {
			return Err(DispatchError::Cancelled(reason));
		}

		let result = tokio::select! {
			biased;
			reason = ctx.done() => Err(DispatchError::Cancelled(reason)),
			result = self.processor.process_alert(ctx, alert) => result.map_err(DispatchError::Processor),
		};

		if let Err(err) = &result {
			warn!(
				fingerprint = %alert.fingerprint,
				alertname = %alert.alert_name,
				"failed to process alert: {}",
				err
			);
		}

		result
	}

	/// runs `f` and records its duration as `stage`
	fn stage<T>(&self, stage: Stage, f: impl FnOnce() -> T) -> T {
		let started = std::time::Instant::now();
		let result = f();
		self.metrics.record_stage(stage.as_str(), started.elapsed());
		result
	}
}
