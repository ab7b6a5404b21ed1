//! TOML configuration file loading.
//!
//! The file is optional: without `--config` the bridge runs on
//! [`BridgeConfig::default`].  When a path is given it must exist and parse;
//! fields missing from the file keep their defaults (see
//! [`crate::domain::config`]).

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::BridgeConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Loads a [`BridgeConfig`] from the TOML file at `path`.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] if the file cannot be read and
/// [`ConfigFileError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Renders `config` as pretty-printed TOML.
///
/// # Errors
///
/// Returns [`ConfigFileError::Serialize`] if serialization fails.
pub fn render_config(config: &BridgeConfig) -> Result<String, ConfigFileError> {
    Ok(toml::to_string_pretty(config)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_reads_file() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_addr = \"127.0.0.1:31001\"").unwrap();
        writeln!(file, "[stream]").unwrap();
        writeln!(file, "interval_ms = 25").unwrap();

        // Act
        let cfg = load_config(file.path()).unwrap();

        // Assert
        assert_eq!(cfg.bind_addr.port(), 31001);
        assert_eq!(cfg.stream.interval_ms, 25);
        assert_eq!(cfg.device.window_length, 8);
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let result = load_config(Path::new("/nonexistent/regbridge.toml"));
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }

    #[test]
    fn test_load_config_malformed_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_addr = [not toml").unwrap();

        let result = load_config(file.path());

        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_load_config_rejects_unknown_access_policy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]").unwrap();
        writeln!(file, "access_policy = \"sometimes\"").unwrap();

        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_render_config_round_trips_through_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let cfg = BridgeConfig::default();
        file.write_all(render_config(&cfg).unwrap().as_bytes()).unwrap();

        assert_eq!(load_config(file.path()).unwrap(), cfg);
    }
}
