//! Settings errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read, write or locate the client configuration
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The platform has no config directory (no `$HOME`, sandboxed, ...)
    #[error("no platform configuration directory")]
    NoConfigDirectory,

    #[error("malformed JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("cannot encode TOML config: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SettingsError {
    pub(crate) fn read(path: &std::path::Path, source: io::Error) -> Self {
        SettingsError::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn write(path: &std::path::Path, source: io::Error) -> Self {
        SettingsError::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Configuration content the client cannot run with
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Only `.json` and `.toml` are understood
    #[error("unsupported config format '{0}', expected json or toml")]
    UnsupportedFormat(String),

    #[error("value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },
}

impl From<SettingsError> for ghostlink_core::Error {
    fn from(err: SettingsError) -> Self {
        ghostlink_core::Error::other(err.to_string())
    }
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_io_errors_name_the_file() {
        let err = SettingsError::read(
            Path::new("/etc/ghostlink.toml"),
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.to_string(), "cannot read /etc/ghostlink.toml: missing");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: SettingsError = ConfigError::ValueOutOfRange {
            key: "protocol.heartbeat_interval_ms".to_string(),
            value: "0".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "value out of range for 'protocol.heartbeat_interval_ms': 0"
        );
    }

    #[test]
    fn test_converts_into_core_error() {
        let err: ghostlink_core::Error = SettingsError::NoConfigDirectory.into();
        assert!(err.to_string().contains("configuration directory"));
    }
}
