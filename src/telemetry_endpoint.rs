//! Here we expose prometheus metrics about the ingestion pipeline
use std::{
	future::Future,
	net::{IpAddr, SocketAddr},
};

use anyhow::{Context, Result};
use axum::{
	http::{header::CONTENT_TYPE, StatusCode},
	response::{IntoResponse, Response},
	routing::get,
	Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

use crate::settings::Settings;

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryEndpointSettings {
	pub bind_address: IpAddr,
	pub port: u16,
}

impl TelemetryEndpointSettings {
	pub fn global() -> &'static Self {
		&Settings::global().telemetry_endpoint
	}

	pub fn to_socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind_address, self.port)
	}
}

async fn metrics_handler() -> Response {
	let mut buffer = vec![];
	let encoder = TextEncoder::new();
	let metric_families = prometheus::gather();

	if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
		tracing::error!("failed to encode metrics: {}", err);
		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}

	([(CONTENT_TYPE, encoder.format_type().to_owned())], buffer).into_response()
}

pub fn router() -> Router {
	Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_telemetry_endpoint(shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
	let addr = TelemetryEndpointSettings::global().to_socket_addr();

	axum::Server::try_bind(&addr)
		.with_context(|| format!("failed to bind telemetry endpoint to {addr}"))?
		.serve(router().into_make_service())
		.with_graceful_shutdown(shutdown)
		.await
		.context("telemetry endpoint crashed")?;

	Ok(())
}
