use anyhow::{Context, Result};
use clap::{Arg, Command};
use config::Config;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{
	alertmanager_webhook_receiver::AlertReceiverSettings, log::LogSettings,
	telemetry_endpoint::TelemetryEndpointSettings,
};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// prefix of environment variables overriding the config file, nested keys are
/// separated by `__` (e.g. `ALERT_INGEST__ALERT_WEBHOOK_RECEIVER__PORT`)
const ENV_PREFIX: &str = "ALERT_INGEST";

fn default_queue_capacity() -> usize {
	1024
}

/// settings of the downstream alert pipeline binding
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
	/// capacity of the channel between the receiver and the alert pipeline
	#[serde(default = "default_queue_capacity")]
	pub queue_capacity: usize,
}

impl Default for PipelineSettings {
	fn default() -> Self {
		Self { queue_capacity: default_queue_capacity() }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	pub alert_webhook_receiver: AlertReceiverSettings,
	pub telemetry_endpoint: TelemetryEndpointSettings,
	#[serde(default)]
	pub pipeline: PipelineSettings,
	pub log: LogSettings,
}

impl Settings {
	pub fn global() -> &'static Self {
		SETTINGS.get_or_init(|| {
			match Self::load().context("failed to load config and command line arguments") {
				Ok(settings) => settings,
				Err(err) => {
					// tracing wasn't setup yet
					panic!("{:#?}", err);
				}
			}
		})
	}

	fn command() -> Command<'static> {
		Command::new(clap::crate_name!())
			.version(clap::crate_version!())
			.about(clap::crate_description!())
			.author(clap::crate_authors!())
			.args(&[
				Arg::new("config")
					.help("path of config file")
					.takes_value(true)
					.short('c')
					.long("config")
					.default_value("./config.yaml"),
				Arg::new("level")
					.help("log level")
					.possible_values(["error", "warn", "info", "debug", "trace"])
					.ignore_case(true)
					.takes_value(true)
					.long("log"),
			])
	}

	fn load() -> Result<Self> {
		let opts = Self::command().get_matches();

		let config_path = opts.value_of("config").context("no config path given")?;

		let conf = Config::builder()
			.add_source(config::File::with_name(config_path))
			.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
			.build()
			.context("can't load config")?;

		let mut settings: Settings = conf.try_deserialize().context("can't load config")?;

		if let Some(level) = opts.value_of("level") {
			settings.log.level = level.to_string();
		}

		Ok(settings)
	}
}
