//! Parser for the Alertmanager notifier webhook
//! (<https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>)

use std::collections::HashMap;

use serde::Deserialize;

use super::{convert_alert, AlertParser, ConversionError, ParseError};
use crate::{
	alert::{AlertStatus, CanonicalAlert, NormalizedWebhook, SourceFormat, WireAlert},
	validate::{ValidationResult, Validator},
};

/// data sent by Alertmanager to a webhook receiver
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
	version: String,
	group_key: String,
	receiver: String,
	#[serde(default)]
	status: String,
	#[serde(default)]
	truncated_alerts: u64,
	#[serde(default)]
	group_labels: HashMap<String, String>,
	#[serde(default)]
	alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Alert {
	#[serde(default)]
	status: String,
	#[serde(default)]
	labels: HashMap<String, String>,
	#[serde(default)]
	annotations: HashMap<String, String>,
	#[serde(default)]
	starts_at: Option<String>,
	#[serde(default)]
	ends_at: Option<String>,
	#[serde(default, rename = "generatorURL")]
	generator_url: Option<String>,
	#[serde(default)]
	fingerprint: Option<String>,
}

/// Maps an Alertmanager status onto the domain status, `None` if it is
/// neither `firing` nor `resolved`.
pub fn map_status(status: &str) -> Option<AlertStatus> {
	match status {
		"firing" => Some(AlertStatus::Firing),
		"resolved" => Some(AlertStatus::Resolved),
		_ => None,
	}
}

/// Parser for the native Alertmanager webhook format
#[derive(Debug, Clone)]
pub struct AlertmanagerParser {
	validator: Validator,
}

impl AlertmanagerParser {
	/// # Arguments
	///
	/// * `max_alerts` - maximum number of alerts per webhook
	pub fn new(max_alerts: usize) -> Self {
		Self { validator: Validator::new(max_alerts, false) }
	}
}

impl AlertParser for AlertmanagerParser {
	fn name(&self) -> &'static str {
		"alertmanager"
	}

	fn parse(&self, payload: &[u8]) -> Result<NormalizedWebhook, ParseError> {
		let data: Data = serde_json::from_slice(payload)
			.map_err(|source| ParseError::Malformed { format: "alertmanager webhook", source })?;

		if data.alerts.is_empty() {
			return Err(ParseError::NoAlerts);
		}

		tracing::debug!(
			version = %data.version,
			group_key = %data.group_key,
			status = %data.status,
			alerts = data.alerts.len(),
			"decoded alertmanager webhook"
		);

		if data.truncated_alerts > 0 {
			tracing::warn!(
				"alertmanager truncated {} alerts of group {}",
				data.truncated_alerts,
				data.group_key
			);
		}

		let group_labels = data.group_labels;
		let alerts = data
			.alerts
			.into_iter()
			.map(|alert| {
				// group labels are already part of every alert's labels, merge
				// anyway in case a sender strips them
				let mut labels = group_labels.clone();
				labels.extend(alert.labels);

				WireAlert {
					labels,
					annotations: alert.annotations,
					state: alert.status,
					starts_at: alert.starts_at,
					ends_at: alert.ends_at,
					generator_url: alert.generator_url,
					value: None,
					fingerprint: alert.fingerprint,
				}
			})
			.collect();

		Ok(NormalizedWebhook {
			source: SourceFormat::Alertmanager,
			alerts,
			group_key: Some(data.group_key),
			receiver: Some(data.receiver),
		})
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
			.map(|(index, alert)| {
				let status = map_status(&alert.state).ok_or_else(|| {
					ConversionError::UnknownStatus { index, status: alert.state.clone() }
				})?;
				convert_alert(index, alert, source, status)
			})
			.collect()
	}
}
