use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Connection timeout")]
    Timeout,
    #[error("Invalid resource: {0}")]
    InvalidResource(String),
    #[error("Not connected to an instrument")]
    NotConnected,
    #[error("Instrument ID mismatch, expecting {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },
    #[error("Unknown {domain} value: {value}")]
    UnknownValue { domain: &'static str, value: String },
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Instrument error {code}: {message}")]
    Instrument { code: i32, message: String },
    #[error("Measurement result invalid: {0}")]
    MeasurementInvalid(String),
    #[error("Value out of range: {0}")]
    OutOfRange(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("USB error: {0}")]
    Usb(#[source] rusb::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<std::io::Error> for ScopeError {
    fn from(source: std::io::Error) -> Self {
        if matches!(
            source.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) {
            ScopeError::Timeout
        } else {
            ScopeError::Io {
                source,
                context: "instrument I/O".to_string(),
            }
        }
    }
}

impl From<rusb::Error> for ScopeError {
    fn from(source: rusb::Error) -> Self {
        match source {
            rusb::Error::Timeout => ScopeError::Timeout,
            other => ScopeError::Usb(other),
        }
    }
}

impl ScopeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScopeError::Timeout)
    }

    pub(crate) fn unknown(domain: &'static str, value: impl Into<String>) -> Self {
        ScopeError::UnknownValue {
            domain,
            value: value.into(),
        }
    }
}
