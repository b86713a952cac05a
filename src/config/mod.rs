mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{AgentSettings, BrokerSettings, DispatcherSettings, Settings};

/// Environment variable that overrides `agent.device_id`.
pub const DEVICE_ID_ENV: &str = "DEVICE_ID";

/// Loads the configuration and merges it with default values.
///
/// Sources, later ones winning:
/// 1. `config/default` (any supported format, optional)
/// 2. the explicit file at `path`, when given (format from its extension)
/// 3. `MQTTAGENT_*` environment variables, `__` separating sections
/// 4. `DEVICE_ID`, when set and non-empty
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let device_id = std::env::var(DEVICE_ID_ENV)
        .ok()
        .filter(|id| !id.trim().is_empty());

    let config = builder
        .add_source(
            Environment::with_prefix("MQTTAGENT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("agent.device_id", device_id)?
        .build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}

#[cfg(test)]
mod tests;
