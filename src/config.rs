use crate::driver::{DEFAULT_INSTRUMENT_ID, DriverOptions};
use crate::resource::Resource;
use crate::session::ConnectionConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub connection: ConnectionSettings,
    pub console: ConsoleConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instrument.validate()?;
        self.connection.validate()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InstrumentConfig {
    /// VISA style resource, e.g. `USB0::6833::1230::INSTR`
    pub resource: String,
    pub simulate: bool,
    /// Check the instrument model on connect
    pub id_query: bool,
    /// Reset the instrument on connect
    pub reset: bool,
    pub cache: bool,
    /// Query the error queue after every command
    pub query_instrument_status: bool,
    /// Model prefix expected by the ID query
    pub instrument_id: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            resource: "USB0::6833::1230::INSTR".to_string(),
            simulate: false,
            id_query: true,
            reset: false,
            cache: true,
            query_instrument_status: false,
            instrument_id: DEFAULT_INSTRUMENT_ID.to_string(),
        }
    }
}

impl InstrumentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.simulate {
            self.resource.parse::<Resource>().map_err(|e| {
                ConfigError::Message(format!("Invalid instrument.resource: {e}"))
            })?;
        }
        if self.instrument_id.trim().is_empty() {
            return Err(ConfigError::Message(
                "instrument.instrument_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            simulate: self.simulate,
            cache: self.cache,
            query_instrument_status: self.query_instrument_status,
            instrument_id: self.instrument_id.clone(),
        }
    }
}

/// Session timeouts in milliseconds
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            read_timeout_ms: defaults.read_timeout.as_millis() as u64,
            write_timeout_ms: defaults.write_timeout.as_millis() as u64,
        }
    }
}

impl ConnectionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!(
                    "connection.{name} must be positive"
                )));
            }
        }
        Ok(())
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    /// Plot fetched waveforms in the terminal
    pub plot: bool,
    /// Save fetched waveforms as JSON
    pub save_waveform: bool,
    pub output_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            plot: false,
            save_waveform: false,
            output_path: "./waveforms".to_string(),
        }
    }
}

/// Load configuration from file with layered fallbacks
///
/// Defaults, then the TOML file, then `RUSTY_SCOPE__SECTION__KEY`
/// environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let app_config = read_config(config_path)?;
    app_config.validate()?;
    Ok(app_config)
}

/// Same layering as `load_config`, without validation.
pub fn read_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else {
        // Try common config file locations
        for path in ["config.toml", "base_config.toml"] {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("RUSTY_SCOPE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize::<AppConfig>()
}

/// Load configuration, falling back to defaults when nothing usable is found
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({e}), using defaults");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rusty-scope-{name}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.instrument.instrument_id, "DS1054");
        assert_eq!(
            config.connection.to_connection_config().read_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = write_config(
            "partial",
            r#"
            [instrument]
            resource = "TCPIP0::192.168.1.104::INSTR"
            reset = true

            [connection]
            read_timeout_ms = 30000
            "#,
        );
        let config = load_config(Some(&path)).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.instrument.resource, "TCPIP0::192.168.1.104::INSTR");
        assert!(config.instrument.reset);
        assert!(config.instrument.cache);
        assert_eq!(config.connection.read_timeout_ms, 30000);
        assert_eq!(config.connection.connect_timeout_ms, 5000);
        assert_eq!(config.console.verbosity, "info");
    }

    #[test]
    fn test_invalid_resource_rejected() {
        let path = write_config(
            "badresource",
            r#"
            [instrument]
            resource = "GPIB0::7::INSTR"
            "#,
        );
        let result = load_config(Some(&path));
        fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_simulation_skips_resource_check() {
        let mut config = AppConfig::default();
        config.instrument.simulate = true;
        config.instrument.resource = String::new();
        config.validate().unwrap();
        assert!(config.instrument.driver_options().simulate);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.connection.write_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let missing = Path::new("/nonexistent/rusty-scope.toml");
        assert!(load_config(Some(missing)).is_err());
        let config = load_config_or_default(Some(missing));
        assert_eq!(config.instrument.resource, "USB0::6833::1230::INSTR");
    }

    #[test]
    fn test_read_config_defers_validation() {
        let path = write_config(
            "unvalidated",
            r#"
            [instrument]
            resource = "not a resource"
            "#,
        );
        assert!(load_config(Some(&path)).is_err());

        let mut config = read_config(Some(&path)).unwrap();
        assert_eq!(config.instrument.resource, "not a resource");
        config.instrument.simulate = true;
        config.validate().unwrap();
        fs::remove_file(&path).unwrap();
    }
}
