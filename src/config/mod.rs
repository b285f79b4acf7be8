//! Configuration loading and validation.
//!
//! [`load`] reads a JSON config file, [`parse_config_str`] deserializes
//! one from memory and [`template`] renders the starter config printed by
//! `--print-default-config`. Submodules provide the data model and the
//! validation rules.

pub mod model;
pub mod validation;

use std::path::Path;

use crate::error::MuxError;
use model::Config;

/// Read and parse a JSON config file.
///
/// Validation is left to the caller so a CLI override can still be applied
/// before the config is checked.
pub async fn load(path: &Path) -> Result<Config, MuxError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MuxError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            MuxError::Io(e)
        }
    })?;

    if metadata.is_dir() {
        return Err(MuxError::Configuration(format!(
            "cannot load \"{}\": path is not a file",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content, &path.display().to_string())
}

pub fn parse_config_str(content: &str, path_display: &str) -> Result<Config, MuxError> {
    serde_json::from_str(content).map_err(|e| MuxError::ConfigParse {
        path: path_display.to_string(),
        source: Box::new(e),
    })
}

/// Validate a config, turning the error list into a [`MuxError`].
pub fn check(config: &Config) -> Result<(), MuxError> {
    validation::validate(config).map_err(|errors| MuxError::ConfigValidation { errors })
}

/// Validate only the settings a [`Mux`](crate::mux::Mux) consumes.
pub fn check_mux(config: &Config) -> Result<(), MuxError> {
    validation::validate_mux(config).map_err(|errors| MuxError::ConfigValidation { errors })
}

/// Pretty-printed JSON of [`Config::template`].
#[must_use]
pub fn template() -> String {
    // Serializing plain strings, numbers and maps cannot fail.
    serde_json::to_string_pretty(&Config::template()).unwrap_or_default()
}
