//! Maps a detected [WireFormat] to the parser responsible for it.

use super::{AlertParser, AlertmanagerParser, PrometheusParser};
use crate::detect::WireFormat;

/// The fixed set of parsers, built once at startup and shared between
/// requests.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
	/// default parser, handles the array and grouped families
	prometheus: PrometheusParser,
	/// `None` if the native webhook parser is disabled
	alertmanager: Option<AlertmanagerParser>,
}

impl ParserRegistry {
	/// # Arguments
	///
	/// * `max_alerts` - maximum number of alerts per request after flattening
	///
	/// * `native_webhook_parser` - if false, Alertmanager webhooks are handled
	///   by the default parser as a single alert group
	pub fn new(max_alerts: usize, native_webhook_parser: bool) -> Self {
		Self {
			prometheus: PrometheusParser::new(max_alerts),
			alertmanager: native_webhook_parser.then(|| AlertmanagerParser::new(max_alerts)),
		}
	}

	/// the parser used if no dedicated parser is registered for a format
	pub fn default_parser(&self) -> &dyn AlertParser {
		&self.prometheus
	}

	/// Returns the parser for `format`, `None` for [WireFormat::Unknown].
	pub fn get(&self, format: WireFormat) -> Option<&dyn AlertParser> {
		match format {
			WireFormat::ArrayFamily | WireFormat::GroupedFamily => Some(&self.prometheus),
			WireFormat::NotifierWebhook => match &self.alertmanager {
				Some(parser) => Some(parser),
				None => Some(self.default_parser()),
			},
			WireFormat::Unknown => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alert::{parse_timestamp, AlertStatus};

	#[test]
	fn test_resolves_parsers() {
		let registry = ParserRegistry::new(10, true);
		assert_eq!(registry.get(WireFormat::ArrayFamily).map(|p| p.name()), Some("prometheus"));
		assert_eq!(registry.get(WireFormat::GroupedFamily).map(|p| p.name()), Some("prometheus"));
		assert_eq!(registry.get(WireFormat::NotifierWebhook).map(|p| p.name()), Some("alertmanager"));
		assert!(registry.get(WireFormat::Unknown).is_none());
	}

	#[test]
	fn test_falls_back_to_default_parser() {
		let registry = ParserRegistry::new(10, false);
		assert_eq!(registry.get(WireFormat::NotifierWebhook).map(|p| p.name()), Some("prometheus"));
	}

	#[test]
	fn test_default_parser_handles_alertmanager_payloads() {
		let payload = serde_json::json!({
			"version": "4",
			"groupKey": "{}:{}",
			"receiver": "ingest",
			"status": "firing",
			"groupLabels": {"alertname": "Disk"},
			"alerts": [{
				"status": "firing",
				"labels": {"instance": "db-1"},
				"annotations": {},
				"startsAt": "2025-01-01T00:00:00Z",
				"generatorURL": "http://prometheus:9090/graph"
			}]
		});

		let registry = ParserRegistry::new(10, false);
		let parser = registry.get(WireFormat::NotifierWebhook).unwrap();
		let webhook = parser.parse(payload.to_string().as_bytes()).unwrap();
		assert!(parser.validate(&webhook).valid);

		let alerts = parser.convert_to_domain(webhook).unwrap();
		assert_eq!(alerts[0].alert_name, "Disk");
	}

	#[test]
	fn test_default_parser_keeps_resolved_alerts_resolved() {
		let payload = serde_json::json!({
			"version": "4",
			"groupKey": "{}:{}",
			"receiver": "ingest",
			"status": "resolved",
			"groupLabels": {"alertname": "Disk"},
			"alerts": [{
				"status": "resolved",
				"labels": {"instance": "db-1"},
				"annotations": {},
				"startsAt": "2025-01-01T00:00:00Z",
				"endsAt": "2025-01-01T01:00:00Z",
				"generatorURL": "http://prometheus:9090/graph"
			}]
		});

		let registry = ParserRegistry::new(10, false);
		let parser = registry.get(WireFormat::NotifierWebhook).unwrap();
		let webhook = parser.parse(payload.to_string().as_bytes()).unwrap();
		let alerts = parser.convert_to_domain(webhook).unwrap();

		assert_eq!(alerts[0].status, AlertStatus::Resolved);
		assert_eq!(alerts[0].ends_at, parse_timestamp("2025-01-01T01:00:00Z").ok());
	}
}
