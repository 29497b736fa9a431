//! data structures shared by every parser: the normalized wire envelope and
//! the canonical alert handed to the downstream pipeline
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::parser::ConversionError;

/// label holding the alert name
pub const ALERT_NAME_LABEL: &str = "alertname";

/// annotation under which the instantaneous metric value of a Prometheus alert
/// is kept, the canonical model has no dedicated slot for it
pub const VALUE_ANNOTATION: &str = "__value__";

/// the wire format family a webhook was decoded from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
	/// flat JSON array of Prometheus rule alerts
	PrometheusArray,
	/// envelope of alert groups, each with shared group labels
	PrometheusGrouped,
	/// the Alertmanager notifier webhook
	Alertmanager,
}

impl SourceFormat {
	/// label value used in logs and metrics
	pub fn as_str(&self) -> &'static str {
		match self {
			SourceFormat::PrometheusArray => "prometheus_array",
			SourceFormat::PrometheusGrouped => "prometheus_grouped",
			SourceFormat::Alertmanager => "alertmanager",
		}
	}

	/// wire name of the start timestamp field, used in validation paths
	pub fn start_field(&self) -> &'static str {
		match self {
			SourceFormat::PrometheusArray | SourceFormat::PrometheusGrouped => "activeAt",
			SourceFormat::Alertmanager => "startsAt",
		}
	}
}

/// a single alert as received, after group flattening but before validation
///
/// Timestamps stay strings here so that a malformed value shows up as a
/// validation error for that one field instead of failing the whole decode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireAlert {
	/// labels, group labels already merged in
	pub labels: HashMap<String, String>,
	/// free form annotations
	pub annotations: HashMap<String, String>,
	/// `state` (Prometheus) or `status` (Alertmanager)
	pub state: String,
	/// `activeAt` (Prometheus) or `startsAt` (Alertmanager)
	pub starts_at: Option<String>,
	/// end of the alert, if any
	pub ends_at: Option<String>,
	/// link back to the source of the alert
	pub generator_url: Option<String>,
	/// Prometheus only: metric value at evaluation time
	pub value: Option<String>,
	/// client supplied fingerprint
	pub fingerprint: Option<String>,
}

impl WireAlert {
	/// the `alertname` label, if present
	pub fn alert_name(&self) -> Option<&str> {
		self.labels.get(ALERT_NAME_LABEL).map(String::as_str)
	}
}

/// envelope produced by every parser: one uniform list of alerts tagged with
/// the format they came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedWebhook {
	/// wire format sub version, only used for observability
	pub source: SourceFormat,
	/// flattened alerts in wire order
	pub alerts: Vec<WireAlert>,
	/// Alertmanager group key
	pub group_key: Option<String>,
	/// Alertmanager receiver name
	pub receiver: Option<String>,
}

/// two valued alert state of the domain model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
	Firing,
	Resolved,
}

impl AlertStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			AlertStatus::Firing => "firing",
			AlertStatus::Resolved => "resolved",
		}
	}
}

/// the canonical alert every wire format is converted into
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAlert {
	/// 64 char lowercase hex deduplication key
	pub fingerprint: String,
	/// never empty
	pub alert_name: String,
	pub status: AlertStatus,
	pub labels: BTreeMap<String, String>,
	pub annotations: BTreeMap<String, String>,
	/// never the zero timestamp
	pub starts_at: DateTime<Utc>,
	pub ends_at: Option<DateTime<Utc>>,
	#[serde(rename = "generatorURL")]
	pub generator_url: Option<String>,
	/// point in time this service converted the alert
	pub ingested_at: DateTime<Utc>,
	/// wire format the alert arrived in
	pub source: SourceFormat,
}

/// fields needed to construct a [CanonicalAlert]
#[derive(Debug)]
pub struct CanonicalAlertParts {
	pub fingerprint: String,
	pub alert_name: String,
	pub status: AlertStatus,
	pub labels: BTreeMap<String, String>,
	pub annotations: BTreeMap<String, String>,
	pub starts_at: DateTime<Utc>,
	pub ends_at: Option<DateTime<Utc>>,
	pub generator_url: Option<String>,
	pub source: SourceFormat,
}

impl CanonicalAlert {
	/// Constructs a canonical alert, refusing an empty name or a zero start
	/// timestamp.
	///
	/// # Arguments
	///
	/// * `index` - position of the alert in the flattened webhook, used for
	///   error reporting
	///
	/// * `parts` - the converted fields
	pub fn new(index: usize, parts: CanonicalAlertParts) -> Result<Self, ConversionError> {
		if parts.alert_name.is_empty() {
			return Err(ConversionError::MissingAlertName { index });
		}

		if is_zero_time(&parts.starts_at) {
			return Err(ConversionError::ZeroStartTime { index });
		}

		Ok(Self {
			fingerprint: parts.fingerprint,
			alert_name: parts.alert_name,
			status: parts.status,
			labels: parts.labels,
			annotations: parts.annotations,
			starts_at: parts.starts_at,
			ends_at: parts.ends_at,
			generator_url: parts.generator_url,
			ingested_at: Utc::now(),
			source: parts.source,
		})
	}
}

/// Go style zero timestamp (`0001-01-01T00:00:00Z`) or anything before it, as
/// emitted by Alertmanager for unset times
pub fn is_zero_time(time: &DateTime<Utc>) -> bool {
	time.year() <= 1
}

/// Parses an RFC 3339 wire timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
	DateTime::parse_from_rfc3339(raw).map(|time| time.with_timezone(&Utc))
}
