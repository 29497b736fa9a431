use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::{
	filter::LevelFilter, fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
	EnvFilter,
};

use crate::settings::Settings;

fn default_level() -> String {
	String::from("info")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
	#[serde(default = "default_level")]
	pub level: String,
}

impl LogSettings {
	pub fn global() -> &'static Self {
		&Settings::global().log
	}
}

/// filter for the configured level, keeping the HTTP stack quiet
fn filter(level: &str) -> Result<EnvFilter> {
	let level = tracing::Level::from_str(level)
		.with_context(|| format!("invalid log level {level:?}"))?;

	Ok(EnvFilter::default()
		.add_directive(LevelFilter::from_level(level).into())
		.add_directive("hyper=warn".parse()?)
		.add_directive("tower=warn".parse()?))
}

pub fn setup_logging() -> Result<()> {
	let filter_layer = filter(LogSettings::global().level.as_str())?;
	let fmt_layer = fmt::layer();

	tracing_subscriber::registry()
		.with(filter_layer)
		.with(fmt_layer)
		.try_init()
		.context("a global tracing subscriber is already installed")?;

	Ok(())
}
