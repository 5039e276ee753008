//! Run settings from an optional TOML file and `PROCPIPE_*` environment variables

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use procpipe::RunSettings;
use tracing::debug;

use crate::error::CliResult;

/// Environment prefix, e.g. `PROCPIPE_NO_RUN=true`
pub const ENV_PREFIX: &str = "PROCPIPE";

/// Load settings; a given config file must exist, the environment overrides it
pub fn load_settings(config_path: Option<&Path>) -> CliResult<RunSettings> {
    let mut builder = Config::builder();
    if let Some(path) = config_path {
        debug!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    let config = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?;

    let settings: RunSettings = config.try_deserialize()?;
    if settings.poll_interval_ms == 0 {
        return Err(crate::error::CliError::Config(
            "poll_interval_ms must be greater than 0".to_string(),
        ));
    }
    Ok(settings)
}
