//! HTTP endpoint accepting alert webhooks from Prometheus and Alertmanager
use std::{
	future::Future,
	net::{IpAddr, SocketAddr},
	sync::Arc,
	time::Duration,
};

use anyhow::{Context, Result};
use axum::{
	extract::{Extension, RawBody},
	http::{HeaderMap, Method},
	routing::any,
	Router,
};
use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use tokio_util::sync::CancellationToken;

use crate::{
	ingest::{IngestLimits, IngestResponse, IngestionHandler},
	settings::Settings,
};

fn default_path() -> String {
	String::from("/api/v2/alerts")
}

fn default_max_body_bytes() -> usize {
	1024 * 1024
}

fn default_max_alerts() -> usize {
	1000
}

fn default_dispatch_timeout() -> Duration {
	Duration::from_secs(30)
}

fn default_native_webhook_parser() -> bool {
	true
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct AlertReceiverSettings {
	pub bind_address: IpAddr,
	pub port: u16,
	/// url path of the ingestion endpoint
	#[serde(default = "default_path")]
	pub path: String,
	#[serde(default = "default_max_body_bytes")]
	pub max_body_bytes: usize,
	/// maximum number of alerts per request, counted after flattening groups
	#[serde(default = "default_max_alerts")]
	pub max_alerts: usize,
	#[serde_as(as = "DurationSecondsWithFrac<f64>")]
	#[serde(default = "default_dispatch_timeout")]
	pub dispatch_timeout: Duration,
	/// parse Alertmanager webhooks with the dedicated parser instead of the
	/// default one
	#[serde(default = "default_native_webhook_parser")]
	pub native_webhook_parser: bool,
}

impl AlertReceiverSettings {
	pub fn global() -> &'static Self {
		&Settings::global().alert_webhook_receiver
	}

	pub fn to_socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind_address, self.port)
	}

	pub fn limits(&self) -> IngestLimits {
		IngestLimits {
			max_body_bytes: self.max_body_bytes,
			max_alerts: self.max_alerts,
			dispatch_timeout: self.dispatch_timeout,
		}
	}
}

async fn receive_alerts(
	Extension(handler): Extension<Arc<IngestionHandler>>,
	method: Method,
	headers: HeaderMap,
	RawBody(body): RawBody,
) -> IngestResponse {
	let cancel = CancellationToken::new();
	// hyper drops this future if the client disconnects, which cancels the
	// context for anything still running downstream
	let _guard = cancel.clone().drop_guard();

	handler.handle(&method, &headers, body, &cancel).await
}

/// router serving the ingestion endpoint at `path`
pub fn router(handler: Arc<IngestionHandler>, path: &str) -> Router {
	Router::new().route(path, any(receive_alerts)).layer(Extension(handler))
}

pub async fn run_alert_receiver(
	handler: Arc<IngestionHandler>,
	shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
	let settings = AlertReceiverSettings::global();
	let addr = settings.to_socket_addr();
	let app = router(handler, &settings.path);

	tracing::info!("accepting alerts on http://{}{}", addr, settings.path);

	axum::Server::try_bind(&addr)
		.with_context(|| format!("failed to bind alert receiver to {addr}"))?
		.serve(app.into_make_service())
		.with_graceful_shutdown(shutdown)
		.await
		.context("alert receiver endpoint crashed")?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use anyhow::anyhow;
	use async_trait::async_trait;
	use axum::{
		body::{Body, HttpBody},
		http::{header::ALLOW, Request, StatusCode},
		response::Response,
	};
	use serde_json::{json, Value};
	use tower::ServiceExt;

	use super::*;
	use crate::{
		alert::CanonicalAlert,
		metrics::IngestMetrics,
		parser::ParserRegistry,
		processor::{AlertProcessor, RequestContext},
	};

	/// rejects alerts named `Broken`
	struct PickyProcessor;

	#[async_trait]
	impl AlertProcessor for PickyProcessor {
		async fn process_alert(&self, _ctx: &RequestContext, alert: &CanonicalAlert) -> anyhow::Result<()> {
			match alert.alert_name.as_str() {
				"Broken" => Err(anyhow!("cache unavailable")),
				_ => Ok(()),
			}
		}
	}

	fn app() -> Router {
		let limits = IngestLimits {
			max_body_bytes: 16 * 1024,
			max_alerts: 100,
			dispatch_timeout: Duration::from_secs(5),
		};
		let handler = IngestionHandler::new(
			Arc::new(ParserRegistry::new(limits.max_alerts, true)),
			Arc::new(PickyProcessor),
			limits,
			IngestMetrics::unregistered(),
		);
		router(Arc::new(handler), "/api/v2/alerts")
	}

	async fn json_body(response: Response) -> Value {
		let mut body = response.into_body();
		let mut bytes = Vec::new();
		while let Some(chunk) = body.data().await {
			bytes.extend_from_slice(&chunk.unwrap());
		}
		serde_json::from_slice(&bytes).unwrap()
	}

	fn post(payload: Value) -> Request<Body> {
		Request::builder()
			.method("POST")
			.uri("/api/v2/alerts")
			.header("content-type", "application/json")
			.body(Body::from(payload.to_string()))
			.unwrap()
	}

	fn notifier_webhook(names: &[&str]) -> Value {
		let alerts: Vec<Value> = names
			.iter()
			.map(|name| {
				json!({
					"status": "firing",
					"labels": {"alertname": name, "severity": "page"},
					"annotations": {},
					"startsAt": "2025-01-01T00:00:00Z",
					"endsAt": "0001-01-01T00:00:00Z",
					"generatorURL": "http://prometheus:9090/graph",
					"fingerprint": "c0ffee0123456789"
				})
			})
			.collect();

		json!({
			"version": "4",
			"groupKey": "{}:{severity=\"page\"}",
			"truncatedAlerts": 0,
			"status": "firing",
			"receiver": "ingest",
			"groupLabels": {"severity": "page"},
			"commonLabels": {"severity": "page"},
			"commonAnnotations": {},
			"externalURL": "http://alertmanager:9093",
			"alerts": alerts
		})
	}

	#[tokio::test]
	async fn test_accepts_notifier_webhook() {
		let response = app().oneshot(post(notifier_webhook(&["Disk", "Memory"]))).await.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = json_body(response).await;
		assert_eq!(body["status"], "success");
		assert_eq!(body["data"]["received"], 2);
		assert_eq!(body["data"]["processed"], 2);
	}

	#[tokio::test]
	async fn test_partial_success_over_http() {
		let response =
			app().oneshot(post(notifier_webhook(&["Disk", "Broken", "Memory"]))).await.unwrap();

		assert_eq!(response.status(), StatusCode::MULTI_STATUS);
		let body = json_body(response).await;
		assert_eq!(body["status"], "partial");
		assert_eq!(body["data"]["failed"], 1);
		assert_eq!(body["data"]["errors"][0]["index"], 1);
		assert_eq!(body["data"]["errors"][0]["error"], "cache unavailable");
	}

	#[tokio::test]
	async fn test_other_methods_get_structured_405() {
		let request = Request::builder().method("GET").uri("/api/v2/alerts").body(Body::empty()).unwrap();
		let response = app().oneshot(request).await.unwrap();

		assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
		assert_eq!(response.headers().get(ALLOW).unwrap(), "POST");
		let body = json_body(response).await;
		assert_eq!(body["status"], "error");
		assert!(body["error"].as_str().unwrap().contains("GET"));
	}

	#[tokio::test]
	async fn test_unknown_payload_is_bad_request() {
		let response = app().oneshot(post(json!({"hello": "world"}))).await.unwrap();

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
		let body = json_body(response).await;
		assert_eq!(body["status"], "error");
	}

	#[tokio::test]
	async fn test_unknown_path_is_not_found() {
		let request = Request::builder()
			.method("POST")
			.uri("/somewhere/else")
			.body(Body::from("[]"))
			.unwrap();
		let response = app().oneshot(request).await.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[test]
	fn test_settings_defaults() {
		let settings: AlertReceiverSettings =
			serde_json::from_value(json!({"bind_address": "127.0.0.1", "port": 9094})).unwrap();

		assert_eq!(settings.path, "/api/v2/alerts");
		assert_eq!(settings.limits().max_alerts, 1000);
		assert_eq!(settings.limits().max_body_bytes, 1024 * 1024);
		assert_eq!(settings.dispatch_timeout, Duration::from_secs(30));
		assert!(settings.native_webhook_parser);
	}

	#[test]
	fn test_settings_fractional_timeout() {
		let settings: AlertReceiverSettings = serde_json::from_value(
			json!({"bind_address": "0.0.0.0", "port": 9094, "dispatch_timeout": 2.5}),
		)
		.unwrap();
		assert_eq!(settings.dispatch_timeout, Duration::from_millis(2500));
	}
}
