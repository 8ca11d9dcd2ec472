//! Service configuration.
//!
//! Settings are read once at startup (command line, environment, optional
//! `.env` file) and then shared read-only with every request through `Arc`.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_TEMPLATE_PATH: &str = "assets/template.png";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Immutable service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    /// Shared secret callers must present as `authSecret`.
    pub auth_secret: String,

    /// Background raster the QR code is stamped onto.
    pub template_path: PathBuf,

    /// TrueType face for captions the built-in font cannot show.
    pub caption_font: Option<PathBuf>,

    /// Upper bound for producing one document.
    pub request_timeout: Duration,

    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "qr_pdf_service=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Settings with defaults for everything but the secret.
    pub fn new(auth_secret: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            auth_secret: auth_secret.into(),
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            caption_font: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            logging: LoggingConfig::default(),
        }
    }

    pub fn with_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_secret.is_empty() {
            bail!("AUTH_SECRET must be set to a non-empty value");
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    /// Compare a caller-supplied secret against the configured one.
    ///
    /// Runs in time independent of where the first differing byte is.
    pub fn secret_matches(&self, candidate: &str) -> bool {
        let expected = self.auth_secret.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::new("s3cret");
        assert_eq!(settings.port, 3002);
        assert_eq!(settings.template_path, PathBuf::from("assets/template.png"));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let err = Settings::new("").validate().unwrap_err();
        assert!(err.to_string().contains("AUTH_SECRET"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = Settings::new("s3cret").with_request_timeout(Duration::ZERO);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_secret_matches_exactly() {
        let settings = Settings::new("s3cret");
        assert!(settings.secret_matches("s3cret"));
    }

    #[test]
    fn test_secret_mismatches() {
        let settings = Settings::new("s3cret");
        for candidate in ["", "S3CRET", "s3cret ", " s3cret", "s3cre", "s3cret\n", "wrong"] {
            assert!(!settings.secret_matches(candidate), "{candidate:?} matched");
        }
    }

    #[test]
    fn test_bind_address() {
        let mut settings = Settings::new("s3cret");
        settings.host = "127.0.0.1".into();
        settings.port = 8080;
        assert_eq!(settings.bind_address(), ("127.0.0.1".to_string(), 8080));
    }
}
