//! Field level validation of a [NormalizedWebhook].
//!
//! The validator never bails out early: every violation of every alert ends
//! up in the returned [ValidationResult], addressed by its path
//! (`alerts[i].<field>`) in the flattened alert list.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::alert::{is_zero_time, parse_timestamp, NormalizedWebhook, WireAlert};

/// Prometheus label name grammar
static LABEL_NAME: Lazy<Regex> = Lazy::new(|| {
	#[allow(clippy::expect_used)]
	Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("label name regex is valid")
});

/// what kind of rule a [ValidationIssue] violates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueKind {
	/// a single field of an alert is missing or malformed
	Field,
	/// the webhook as a whole is larger than allowed
	Limit,
}

/// a single violation
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationIssue {
	/// path of the offending field, e.g. `alerts[2].labels.alertname`
	pub field: String,
	pub message: String,
	/// the offending value, `null` if it is missing
	pub value: Value,
	#[serde(skip)]
	pub kind: IssueKind,
}

impl ValidationIssue {
	fn field(field: String, message: impl Into<String>, value: Value) -> Self {
		Self { field, message: message.into(), value, kind: IssueKind::Field }
	}
}

/// all violations found in one webhook
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationResult {
	pub valid: bool,
	pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
	fn from_issues(errors: Vec<ValidationIssue>) -> Self {
		Self { valid: errors.is_empty(), errors }
	}

	/// true if one of the violations is the alert count limit
	pub fn exceeds_limit(&self) -> bool {
		self.errors.iter().any(|issue| issue.kind == IssueKind::Limit)
	}
}

/// Validation rules for one parser family
#[derive(Clone, Debug)]
pub struct Validator {
	/// maximum number of alerts after flattening
	max_alerts: usize,
	/// whether an absent `generatorURL` is a violation
	require_generator_url: bool,
}

impl Validator {
	pub fn new(max_alerts: usize, require_generator_url: bool) -> Self {
		Self { max_alerts, require_generator_url }
	}

	/// Validates every alert of the webhook and returns the complete list of
	/// violations.
	pub fn validate(&self, webhook: &NormalizedWebhook) -> ValidationResult {
		let mut issues = Vec::new();

		if webhook.alerts.len() > self.max_alerts {
			issues.push(ValidationIssue {
				field: "alerts".to_owned(),
				message: format!(
					"alert count {} exceeds the maximum of {}",
					webhook.alerts.len(),
					self.max_alerts
				),
				value: Value::from(webhook.alerts.len()),
				kind: IssueKind::Limit,
			});
		}

		for (index, alert) in webhook.alerts.iter().enumerate() {
			self.validate_alert(webhook, index, alert, &mut issues);
		}

		ValidationResult::from_issues(issues)
	}

	fn validate_alert(
		&self,
		webhook: &NormalizedWebhook,
		index: usize,
		alert: &WireAlert,
		issues: &mut Vec<ValidationIssue>,
	) {
		let path = |field: &str| format!("alerts[{index}].{field}");

		match alert.alert_name() {
			None => issues.push(ValidationIssue::field(
				path("labels.alertname"),
				"required field missing",
				Value::Null,
			)),
			Some("") => issues.push(ValidationIssue::field(
				path("labels.alertname"),
				"must not be empty",
				Value::from(""),
			)),
			Some(_) => {}
		}

		// sorted so the reported order doesn't depend on hash map iteration
		let mut invalid_keys: Vec<&String> =
			alert.labels.keys().filter(|key| !LABEL_NAME.is_match(key)).collect();
		invalid_keys.sort();
		for key in invalid_keys {
			issues.push(ValidationIssue::field(
				path(&format!("labels.{key}")),
				"invalid label name, must match [A-Za-z_][A-Za-z0-9_]*",
				Value::from(key.as_str()),
			));
		}

		let start_field = webhook.source.start_field();
		match alert.starts_at.as_deref() {
			None | Some("") => issues.push(ValidationIssue::field(
				path(start_field),
				"required field missing",
				Value::Null,
			)),
			Some(raw) => match parse_timestamp(raw) {
				Ok(time) if is_zero_time(&time) => issues.push(ValidationIssue::field(
					path(start_field),
					"timestamp must not be zero",
					Value::from(raw),
				)),
				Ok(_) => {}
				Err(err) => issues.push(ValidationIssue::field(
					path(start_field),
					format!("invalid RFC 3339 timestamp: {err}"),
					Value::from(raw),
				)),
			},
		}

		if let Some(raw) = alert.ends_at.as_deref().filter(|raw| !raw.is_empty()) {
			if let Err(err) = parse_timestamp(raw) {
				issues.push(ValidationIssue::field(
					path("endsAt"),
					format!("invalid RFC 3339 timestamp: {err}"),
					Value::from(raw),
				));
			}
		}

		match alert.generator_url.as_deref().filter(|url| !url.is_empty()) {
			None if self.require_generator_url => issues.push(ValidationIssue::field(
				path("generatorURL"),
				"required field missing",
				Value::Null,
			)),
			None => {}
			Some(raw) => {
				if let Err(err) = Url::parse(raw) {
					issues.push(ValidationIssue::field(
						path("generatorURL"),
						format!("invalid URL: {err}"),
						Value::from(raw),
					));
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;
	use crate::alert::{SourceFormat, ALERT_NAME_LABEL};

	fn alert(name: Option<&str>) -> WireAlert {
		let mut labels = HashMap::new();
		if let Some(name) = name {
			labels.insert(ALERT_NAME_LABEL.to_owned(), name.to_owned());
		}

		WireAlert {
			labels,
			state: "firing".to_owned(),
			starts_at: Some("2025-01-01T00:00:00Z".to_owned()),
			generator_url: Some("http://prometheus:9090/graph?g0.expr=up".to_owned()),
			..WireAlert::default()
		}
	}

	fn webhook(alerts: Vec<WireAlert>) -> NormalizedWebhook {
		NormalizedWebhook {
			source: SourceFormat::PrometheusArray,
			alerts,
			group_key: None,
			receiver: None,
		}
	}

	fn fields(result: &ValidationResult) -> Vec<&str> {
		result.errors.iter().map(|issue| issue.field.as_str()).collect()
	}

	#[test]
	fn test_valid_webhook() {
		let result = Validator::new(10, true).validate(&webhook(vec![alert(Some("A"))]));
		assert!(result.valid);
		assert!(result.errors.is_empty());
	}

	#[test]
	fn test_reports_every_violation() {
		let mut third = alert(Some("C"));
		third.labels.insert("bad-key".to_owned(), "x".to_owned());

		let result =
			Validator::new(10, true).validate(&webhook(vec![alert(None), alert(Some("B")), third]));

		assert!(!result.valid);
		assert_eq!(fields(&result), vec!["alerts[0].labels.alertname", "alerts[2].labels.bad-key"]);
		assert_eq!(result.errors[0].message, "required field missing");
		assert_eq!(result.errors[0].value, Value::Null);
		assert_eq!(result.errors[1].value, Value::from("bad-key"));
	}

	#[test]
	fn test_timestamp_rules() {
		let mut missing = alert(Some("A"));
		missing.starts_at = None;
		let mut garbage = alert(Some("B"));
		garbage.starts_at = Some("last tuesday".to_owned());
		let mut zero = alert(Some("C"));
		zero.starts_at = Some("0001-01-01T00:00:00Z".to_owned());
		let mut bad_end = alert(Some("D"));
		bad_end.ends_at = Some("soon".to_owned());

		let result =
			Validator::new(10, true).validate(&webhook(vec![missing, garbage, zero, bad_end]));

		assert_eq!(
			fields(&result),
			vec!["alerts[0].activeAt", "alerts[1].activeAt", "alerts[2].activeAt", "alerts[3].endsAt"]
		);
		assert_eq!(result.errors[2].message, "timestamp must not be zero");
	}

	#[test]
	fn test_start_field_follows_source_format() {
		let mut missing = alert(Some("A"));
		missing.starts_at = None;
		let mut webhook = webhook(vec![missing]);
		webhook.source = SourceFormat::Alertmanager;

		let result = Validator::new(10, false).validate(&webhook);
		assert_eq!(fields(&result), vec!["alerts[0].startsAt"]);
	}

	#[test]
	fn test_generator_url_rules() {
		let mut absent = alert(Some("A"));
		absent.generator_url = None;
		let mut malformed = alert(Some("B"));
		malformed.generator_url = Some("not a url".to_owned());

		let required = Validator::new(10, true).validate(&webhook(vec![absent.clone(), malformed.clone()]));
		assert_eq!(fields(&required), vec!["alerts[0].generatorURL", "alerts[1].generatorURL"]);

		let optional = Validator::new(10, false).validate(&webhook(vec![absent, malformed]));
		assert_eq!(fields(&optional), vec!["alerts[1].generatorURL"]);
	}

	#[test]
	fn test_alert_count_limit() {
		let alerts = (0..4).map(|i| alert(Some(&format!("A{i}")))).collect();
		let result = Validator::new(3, true).validate(&webhook(alerts));

		assert!(!result.valid);
		assert!(result.exceeds_limit());
		assert_eq!(fields(&result), vec!["alerts"]);
		assert_eq!(result.errors[0].value, Value::from(4));
	}

	#[test]
	fn test_field_violations_are_not_limit_violations() {
		let result = Validator::new(3, true).validate(&webhook(vec![alert(None)]));
		assert!(!result.valid);
		assert!(!result.exceeds_limit());
	}

	#[test]
	fn test_serialized_issue_shape() {
		let result = Validator::new(3, true).validate(&webhook(vec![alert(None)]));
		let json = serde_json::to_value(&result.errors[0]).unwrap();
		assert_eq!(
			json,
			serde_json::json!({
				"field": "alerts[0].labels.alertname",
				"message": "required field missing",
				"value": null
			})
		);
	}
}
