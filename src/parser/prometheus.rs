//! Parser for alerts coming straight from Prometheus rule evaluation, either
//! as a flat JSON array or as an envelope of alert groups with shared group
//! labels.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{convert_alert, AlertParser, ConversionError, ParseError};
use crate::{
	alert::{
		AlertStatus, CanonicalAlert, NormalizedWebhook, SourceFormat, WireAlert, VALUE_ANNOTATION,
	},
	validate::{ValidationResult, Validator},
};

/// a single alert of a Prometheus rule group
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleAlert {
	#[serde(default)]
	labels: HashMap<String, String>,
	#[serde(default)]
	annotations: HashMap<String, String>,
	#[serde(default, alias = "status")]
	state: String,
	#[serde(default, alias = "startsAt")]
	active_at: Option<String>,
	#[serde(default)]
	ends_at: Option<String>,
	#[serde(default, rename = "generatorURL")]
	generator_url: Option<String>,
	#[serde(default, deserialize_with = "metric_value")]
	value: Option<String>,
	#[serde(default)]
	fingerprint: Option<String>,
}

/// alerts sharing a set of group labels
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertGroup {
	#[serde(default)]
	group_labels: HashMap<String, String>,
	#[serde(default)]
	alerts: Vec<RuleAlert>,
}

/// grouped envelope, either a single group inline or a list of `groups`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupedEnvelope {
	#[serde(default)]
	group_labels: HashMap<String, String>,
	#[serde(default)]
	alerts: Vec<RuleAlert>,
	#[serde(default)]
	groups: Vec<AlertGroup>,
}

/// Prometheus reports the value as a string but some senders use numbers
fn metric_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Option::<Value>::deserialize(deserializer)? {
		None | Some(Value::Null) => None,
		Some(Value::String(value)) => Some(value),
		Some(other) => Some(other.to_string()),
	})
}

impl RuleAlert {
	/// Converts into a [WireAlert], merging `group_labels` underneath the
	/// alert's own labels.
	fn into_wire(self, group_labels: &[&HashMap<String, String>]) -> WireAlert {
		let mut labels = HashMap::with_capacity(self.labels.len());
		for group in group_labels {
			labels.extend(group.iter().map(|(k, v)| (k.clone(), v.clone())));
		}
		// alert labels win on collision
		labels.extend(self.labels);

		WireAlert {
			labels,
			annotations: self.annotations,
			state: self.state,
			starts_at: self.active_at,
			ends_at: self.ends_at,
			generator_url: self.generator_url,
			value: self.value,
			fingerprint: self.fingerprint,
		}
	}
}

/// Maps a Prometheus rule state onto the domain status.
///
/// Pending alerts and unknown states count as firing so an alert is never
/// dropped silently.
pub fn map_state(state: &str) -> AlertStatus {
	match state {
		"firing" | "pending" => AlertStatus::Firing,
		// `resolved` arrives when notifier webhooks are routed through this parser
		"inactive" | "resolved" => AlertStatus::Resolved,
		other => {
			tracing::debug!("unknown alert state {:?}, treating as firing", other);
			AlertStatus::Firing
		}
	}
}

/// Parser for the array and grouped Prometheus formats
#[derive(Debug, Clone)]
pub struct PrometheusParser {
	validator: Validator,
}

impl PrometheusParser {
	/// # Arguments
	///
	/// * `max_alerts` - maximum number of alerts after flattening
	pub fn new(max_alerts: usize) -> Self {
		Self { validator: Validator::new(max_alerts, true) }
	}

	fn parse_array(payload: &[u8]) -> Result<NormalizedWebhook, ParseError> {
		let alerts: Vec<RuleAlert> = serde_json::from_slice(payload)
			.map_err(|source| ParseError::Malformed { format: "prometheus array", source })?;

		Ok(NormalizedWebhook {
			source: SourceFormat::PrometheusArray,
			alerts: alerts.into_iter().map(|alert| alert.into_wire(&[])).collect(),
			group_key: None,
			receiver: None,
		})
	}

	fn parse_grouped(payload: &[u8]) -> Result<NormalizedWebhook, ParseError> {
		let envelope: GroupedEnvelope = serde_json::from_slice(payload)
			.map_err(|source| ParseError::Malformed { format: "prometheus grouped", source })?;

		let GroupedEnvelope { group_labels, alerts, groups } = envelope;

		let mut flattened: Vec<WireAlert> =
			alerts.into_iter().map(|alert| alert.into_wire(&[&group_labels])).collect();

		for group in groups {
			flattened.extend(
				group.alerts.into_iter().map(|alert| alert.into_wire(&[&group_labels, &group.group_labels])),
			);
		}

		Ok(NormalizedWebhook {
			source: SourceFormat::PrometheusGrouped,
			alerts: flattened,
			group_key: None,
			receiver: None,
		})
	}
}

impl AlertParser for PrometheusParser {
	fn name(&self) -> &'static str {
		"prometheus"
	}

	fn parse(&self, payload: &[u8]) -> Result<NormalizedWebhook, ParseError> {
		let is_array = payload.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[');

		let webhook =
			if is_array { Self::parse_array(payload)? } else { Self::parse_grouped(payload)? };

		if webhook.alerts.is_empty() {
			return Err(ParseError::NoAlerts);
		}

		Ok(webhook)
	}

	fn validate(&self, webhook: &NormalizedWebhook) -> ValidationResult {
		self.validator.validate(webhook)
	}

	fn convert_to_domain(
		&self,
		webhook: NormalizedWebhook,
	) -> Result<Vec<CanonicalAlert>, ConversionError> {
		let source = webhook.source;

		webhook
			.alerts
			.into_iter()
			.enumerate()
			.map(|(index, mut alert)| {
				let status = map_state(&alert.state);
				if let Some(value) = alert.value.take() {
					alert.annotations.insert(VALUE_ANNOTATION.to_owned(), value);
				}
				convert_alert(index, alert, source, status)
			})
			.collect()
	}
}
