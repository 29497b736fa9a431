//! Parsers turning a raw payload of a detected wire format into canonical
//! alerts.
//!
//! Every parser runs the same three steps: [parse][AlertParser::parse] the
//! bytes into a [NormalizedWebhook], [validate][AlertParser::validate] it and
//! finally [convert][AlertParser::convert_to_domain] it into
//! [CanonicalAlert]s. Which parser handles which format is decided by the
//! [ParserRegistry].

mod alertmanager;
mod prometheus;
mod registry;

use std::collections::BTreeMap;

pub use alertmanager::AlertmanagerParser;
pub use prometheus::PrometheusParser;
pub use registry::ParserRegistry;
use thiserror::Error;

use crate::{
	alert::{
		is_zero_time, parse_timestamp, AlertStatus, CanonicalAlert, CanonicalAlertParts,
		NormalizedWebhook, SourceFormat, WireAlert,
	},
	fingerprint,
	validate::ValidationResult,
};

/// A strategy for one family of wire formats
pub trait AlertParser: Send + Sync {
	/// name used in logs
	fn name(&self) -> &'static str;

	/// Decodes the payload and flattens it into a [NormalizedWebhook]. Fails
	/// if the payload doesn't fit the format or contains no alerts.
	fn parse(&self, payload: &[u8]) -> Result<NormalizedWebhook, ParseError>;

	/// Collects every field level violation, never fails.
	fn validate(&self, webhook: &NormalizedWebhook) -> ValidationResult;

	/// Converts a validated webhook into canonical alerts, keeping wire order.
	fn convert_to_domain(
		&self,
		webhook: NormalizedWebhook,
	) -> Result<Vec<CanonicalAlert>, ConversionError>;
}

/// Error occuring if a payload is structurally malformed for its format
#[derive(Error, Debug)]
pub enum ParseError {
	#[error("malformed {format} payload: {source}")]
	Malformed {
		format: &'static str,
		#[source]
		source: serde_json::Error,
	},
	#[error("payload contains no alerts")]
	NoAlerts,
}

/// Error occuring while converting a wire alert into a [CanonicalAlert]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
	#[error("alerts[{index}]: alert name is missing")]
	MissingAlertName { index: usize },
	#[error("alerts[{index}]: start timestamp is zero")]
	ZeroStartTime { index: usize },
	#[error("alerts[{index}].{field}: invalid timestamp {value:?}")]
	InvalidTimestamp {
		index: usize,
		field: &'static str,
		value: String,
	},
	#[error("alerts[{index}]: unknown alert status {status:?}")]
	UnknownStatus { index: usize, status: String },
}

/// Converts one flattened wire alert. The state has already been mapped by
/// the calling parser because the mapping differs per family.
///
/// # Arguments
///
/// * `index` - position in the flattened alert list
///
/// * `alert` - the validated wire alert
///
/// * `source` - wire format the alert came from
///
/// * `status` - mapped domain status
pub(crate) fn convert_alert(
	index: usize,
	alert: WireAlert,
	source: SourceFormat,
	status: AlertStatus,
) -> Result<CanonicalAlert, ConversionError> {
	let alert_name = alert.alert_name().unwrap_or_default().to_owned();

	let start_field = source.start_field();
	let starts_at = match alert.starts_at.as_deref() {
		Some(raw) => parse_timestamp(raw).map_err(|_| ConversionError::InvalidTimestamp {
			index,
			field: start_field,
			value: raw.to_owned(),
		})?,
		None => {
			return Err(ConversionError::InvalidTimestamp {
				index,
				field: start_field,
				value: String::new(),
			})
		}
	};

	// Alertmanager sends the zero time for alerts that haven't ended
	let ends_at = match alert.ends_at.as_deref().filter(|raw| !raw.is_empty()) {
		Some(raw) => {
			let time = parse_timestamp(raw).map_err(|_| ConversionError::InvalidTimestamp {
				index,
				field: "endsAt",
				value: raw.to_owned(),
			})?;
			(!is_zero_time(&time)).then_some(time)
		}
		None => None,
	};

	let labels: BTreeMap<String, String> = alert.labels.into_iter().collect();

	let fingerprint = match alert.fingerprint {
		Some(supplied) if fingerprint::is_well_formed(&supplied) => supplied.to_ascii_lowercase(),
		_ => fingerprint::fingerprint(&alert_name, &labels),
	};

	CanonicalAlert::new(
		index,
		CanonicalAlertParts {
			fingerprint,
			alert_name,
			status,
			labels,
			annotations: alert.annotations.into_iter().collect(),
			starts_at,
			ends_at,
			generator_url: alert.generator_url.filter(|url| !url.is_empty()),
			source,
		},
	)
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn wire(labels: &[(&str, &str)]) -> WireAlert {
		WireAlert {
			labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(),
			state: "firing".to_owned(),
			starts_at: Some("2025-01-01T00:00:00Z".to_owned()),
			..WireAlert::default()
		}
	}

	#[test]
	fn test_computes_fingerprint_when_missing() {
		let alert = convert_alert(
			0,
			wire(&[("alertname", "A"), ("job", "x")]),
			SourceFormat::PrometheusArray,
			AlertStatus::Firing,
		)
		.unwrap();

		assert_eq!(
			alert.fingerprint,
			fingerprint::fingerprint("A", [("alertname", "A"), ("job", "x")])
		);
	}

	#[test]
	fn test_trusts_only_well_formed_fingerprints() {
		let supplied = "ABCDEF0123456789".repeat(4);
		let mut trusted = wire(&[("alertname", "A")]);
		trusted.fingerprint = Some(supplied.clone());
		let alert =
			convert_alert(0, trusted, SourceFormat::Alertmanager, AlertStatus::Firing).unwrap();
		assert_eq!(alert.fingerprint, supplied.to_ascii_lowercase());

		// Alertmanager's own 16 char fingerprints are recomputed
		let mut short = wire(&[("alertname", "A")]);
		short.fingerprint = Some("1a2b3c4d5e6f7a8b".to_owned());
		let alert = convert_alert(0, short, SourceFormat::Alertmanager, AlertStatus::Firing).unwrap();
		assert_eq!(alert.fingerprint, fingerprint::fingerprint("A", [("alertname", "A")]));
	}

	#[test]
	fn test_zero_end_time_means_not_ended() {
		let mut alert = wire(&[("alertname", "A")]);
		alert.ends_at = Some("0001-01-01T00:00:00Z".to_owned());
		let alert = convert_alert(0, alert, SourceFormat::Alertmanager, AlertStatus::Firing).unwrap();
		assert_eq!(alert.ends_at, None);
	}

	#[test]
	fn test_missing_name_is_conversion_error() {
		let err = convert_alert(4, wire(&[("job", "x")]), SourceFormat::Alertmanager, AlertStatus::Firing)
			.unwrap_err();
		assert_eq!(err, ConversionError::MissingAlertName { index: 4 });
	}

	#[test]
	fn test_unparseable_start_is_conversion_error() {
		let mut alert = wire(&[("alertname", "A")]);
		alert.starts_at = Some("nope".to_owned());
		let err = convert_alert(1, alert, SourceFormat::PrometheusGrouped, AlertStatus::Firing)
			.unwrap_err();
		assert_eq!(
			err,
			ConversionError::InvalidTimestamp { index: 1, field: "activeAt", value: "nope".to_owned() }
		);
	}
}
