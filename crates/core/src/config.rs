//! TOML configuration loading.
//!
//! Configuration structs live next to the subsystem that consumes them and
//! derive `serde::Deserialize`; this module only provides the file plumbing.
//!
//! # Example
//!
//! ```no_run
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, Default)]
//! #[serde(default)]
//! struct WindowConfig {
//!     width: u32,
//!     height: u32,
//! }
//!
//! let config: WindowConfig = mango_core::config::load_toml_or_default("mango.toml")?;
//! # Ok::<(), mango_core::Error>(())
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::Result;

/// Parses a configuration value from a TOML string.
pub fn from_toml_str<T: DeserializeOwned>(source: &str) -> Result<T> {
    Ok(toml::from_str(source)?)
}

/// Loads a configuration value from a TOML file.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read and a parse error if the
/// contents do not match `T`.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    let value = from_toml_str(&source)?;
    info!("Loaded configuration from {}", path.display());
    Ok(value)
}

/// Loads a configuration file if it exists, otherwise returns `T::default()`.
///
/// A file that exists but fails to parse is still an error.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    if path.exists() {
        load_toml(path)
    } else {
        debug!("No configuration at {}, using defaults", path.display());
        Ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde::Deserialize;

    use super::*;
    use crate::Error;

    #[derive(Debug, Deserialize, Default, PartialEq)]
    #[serde(default)]
    struct Sample {
        width: u32,
        vsync: bool,
    }

    #[test]
    fn test_from_toml_str_partial() {
        let sample: Sample = from_toml_str("width = 640").unwrap();
        assert_eq!(
            sample,
            Sample {
                width: 640,
                vsync: false
            }
        );
    }

    #[test]
    fn test_load_toml_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "width = 800\nvsync = true").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(sample.width, 800);
        assert!(sample.vsync);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let sample: Sample = load_toml_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "width = \"wide\"").unwrap();

        let result: Result<Sample> = load_toml_or_default(file.path());
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }
}
