//! Classifies a raw payload into one of the supported wire formats by looking
//! at the shape of the decoded JSON, without committing to any typed struct.

use serde_json::{Map, Value};
use thiserror::Error;

/// the closed set of shapes the detector can report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireFormat {
	/// JSON array of Prometheus rule alerts
	ArrayFamily,
	/// object carrying `alerts` or `groups` together with `groupLabels`
	GroupedFamily,
	/// Alertmanager notifier webhook (`version`, `groupKey`, `receiver`)
	NotifierWebhook,
	/// none of the above
	Unknown,
}

impl WireFormat {
	/// label value used in logs and metrics
	pub fn as_str(&self) -> &'static str {
		match self {
			WireFormat::ArrayFamily => "array",
			WireFormat::GroupedFamily => "grouped",
			WireFormat::NotifierWebhook => "notifier_webhook",
			WireFormat::Unknown => "unknown",
		}
	}
}

/// Error returned if a payload can't be classified
#[derive(Error, Debug)]
pub enum DetectionError {
	#[error("request body is empty")]
	EmptyBody,
	#[error("request body is not valid JSON: {0}")]
	InvalidJson(#[from] serde_json::Error),
	#[error("unrecognized payload format: {0}")]
	UnrecognizedShape(&'static str),
}

/// Detects the wire format of a raw payload.
///
/// Unknown shapes are reported as [DetectionError::UnrecognizedShape], so a
/// successful result is always one of the three concrete formats.
pub fn detect(payload: &[u8]) -> Result<WireFormat, DetectionError> {
	if payload.iter().all(u8::is_ascii_whitespace) {
		return Err(DetectionError::EmptyBody);
	}

	let value: Value = serde_json::from_slice(payload)?;

	match detect_value(&value) {
		WireFormat::Unknown => Err(DetectionError::UnrecognizedShape(describe(&value))),
		format => Ok(format),
	}
}

/// Classifies an already decoded JSON value.
pub fn detect_value(value: &Value) -> WireFormat {
	match value {
		Value::Array(items) => match items.first() {
			Some(Value::Object(first)) if is_rule_alert(first) => WireFormat::ArrayFamily,
			_ => WireFormat::Unknown,
		},
		// most specific shape first: a notifier webhook also carries
		// `alerts` and `groupLabels`
		Value::Object(object) if has_all(object, &["version", "groupKey", "receiver"]) => {
			WireFormat::NotifierWebhook
		}
		Value::Object(object) if is_grouped(object) => WireFormat::GroupedFamily,
		_ => WireFormat::Unknown,
	}
}

/// a Prometheus rule alert carries its evaluation state, activation time and
/// a link back to the rule
fn is_rule_alert(object: &Map<String, Value>) -> bool {
	has_all(object, &["state", "activeAt", "labels", "generatorURL"])
}

fn is_grouped(object: &Map<String, Value>) -> bool {
	object.contains_key("groupLabels") && (object.contains_key("alerts") || object.contains_key("groups"))
}

fn has_all(object: &Map<String, Value>, keys: &[&str]) -> bool {
	keys.iter().all(|key| object.contains_key(*key))
}

/// short reason for an unknown shape, used in the error response
fn describe(value: &Value) -> &'static str {
	match value {
		Value::Array(items) if items.is_empty() => "empty alert array",
		Value::Array(_) => "array elements are not Prometheus alerts",
		Value::Object(_) => "object matches no known alert envelope",
		_ => "payload root must be a JSON object or array",
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn detect_json(value: Value) -> Result<WireFormat, DetectionError> {
		detect(value.to_string().as_bytes())
	}

	#[test]
	fn test_array_family() {
		let payload = json!([{
			"labels": {"alertname": "HighLoad"},
			"annotations": {},
			"state": "firing",
			"activeAt": "2025-01-01T00:00:00Z",
			"generatorURL": "http://prometheus:9090/graph",
			"value": "1e+00"
		}]);
		assert_eq!(detect_json(payload).unwrap(), WireFormat::ArrayFamily);
	}

	#[test]
	fn test_grouped_family() {
		let groups = json!({
			"groupLabels": {"env": "prod"},
			"groups": [{"groupLabels": {"job": "api"}, "alerts": []}]
		});
		assert_eq!(detect_json(groups).unwrap(), WireFormat::GroupedFamily);

		let single = json!({"groupLabels": {"job": "api"}, "alerts": []});
		assert_eq!(detect_json(single).unwrap(), WireFormat::GroupedFamily);
	}

	#[test]
	fn test_notifier_webhook_wins_over_grouped() {
		let payload = json!({
			"version": "4",
			"groupKey": "{}:{alertname=\"X\"}",
			"receiver": "default",
			"status": "firing",
			"groupLabels": {},
			"alerts": []
		});
		assert_eq!(detect_json(payload).unwrap(), WireFormat::NotifierWebhook);
	}

	#[test]
	fn test_unknown_shapes_are_errors() {
		let unknown = [
			json!({"alerts": []}),
			json!({"groups": [{"alerts": []}]}),
			json!({"groups": [{"groupLabels": {"job": "api"}, "alerts": []}]}),
			json!({"groupLabels": {"job": "api"}}),
			json!({"version": "4", "receiver": "x"}),
			json!([]),
			json!([{"labels": {}, "startsAt": "2025-01-01T00:00:00Z"}]),
			json!([{"labels": {"alertname": "X"}, "state": "firing", "activeAt": "2025-01-01T00:00:00Z"}]),
			json!(["firing"]),
			json!("firing"),
			json!(42),
			json!(null),
		];

		for payload in unknown {
			assert!(
				matches!(detect_json(payload.clone()), Err(DetectionError::UnrecognizedShape(_))),
				"{payload} was classified"
			);
		}
	}

	#[test]
	fn test_empty_and_invalid_bodies() {
		assert!(matches!(detect(b""), Err(DetectionError::EmptyBody)));
		assert!(matches!(detect(b"  \n"), Err(DetectionError::EmptyBody)));
		assert!(matches!(detect(b"{\"alerts\": ["), Err(DetectionError::InvalidJson(_))));
	}

	#[test]
	fn test_detect_value_reports_unknown_tag() {
		assert_eq!(detect_value(&json!({"foo": 1})), WireFormat::Unknown);
		assert_eq!(detect_value(&json!({"groups": []})), WireFormat::Unknown);
		assert_eq!(detect_value(&json!({"groups": [], "groupLabels": {}})), WireFormat::GroupedFamily);
	}
}
