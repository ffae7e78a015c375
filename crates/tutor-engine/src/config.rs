//! Configuration types for the tutoring engine.
//!
//! This module provides the configuration structures that control where the
//! generation service lives, how remote calls are retried, and how a session
//! starts (interaction mode, solo grading path, offline fallback).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};
use crate::mode::Mode;

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "tutor.json";

/// Environment variable overriding `apiBaseUrl`.
pub const ENV_API_URL: &str = "TUTOR_API_URL";

/// Environment variable overriding `apiKey`.
pub const ENV_API_KEY: &str = "TUTOR_API_KEY";

/// Environment variable overriding `modelName`.
pub const ENV_MODEL: &str = "TUTOR_MODEL";

/// Default base URL of the generation service.
fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

/// Default model name sent with every generation request.
fn default_model_name() -> String {
    "gemini-2.5-flash".to_string()
}

/// Default transport timeout in seconds.
const fn default_request_timeout() -> u64 {
    30
}

/// Default maximum retries for transient failures.
const fn default_max_retries() -> u32 {
    3
}

/// Default base backoff delay in milliseconds.
const fn default_base_delay_ms() -> u64 {
    1000
}

/// Default backoff cap in milliseconds.
const fn default_max_delay_ms() -> u64 {
    10_000
}

/// Default report output directory.
fn default_output_dir() -> String {
    ".".to_string()
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the tutoring client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the generation service.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Model name forwarded to the generation service.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// API key sent in the `X-API-Key` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Transport timeout per attempt, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Interaction mode a fresh session starts in.
    #[serde(default)]
    pub default_mode: Mode,

    /// How solo answers are graded.
    #[serde(default)]
    pub solo_grading: SoloGrading,

    /// Whether degraded offline mode may be offered.
    #[serde(default = "default_true")]
    pub offline_fallback: bool,

    /// Skip the service entirely and run offline.
    #[serde(default)]
    pub force_offline: bool,

    /// Output directory for progress reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            model_name: default_model_name(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            retry: RetrySettings::default(),
            default_mode: Mode::default(),
            solo_grading: SoloGrading::default(),
            offline_fallback: default_true(),
            force_offline: false,
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        let mut config = Self::load_from_dir(&current_dir)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `TutorError::ConfigValidationError` if the configuration values
    /// are invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TUTOR_API_URL`, `TUTOR_API_KEY` and `TUTOR_MODEL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.model_name = model;
        }
    }

    /// Returns the transport timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        let url = self.api_base_url.trim();
        if url.is_empty() {
            return Err(TutorError::config_validation(
                "apiBaseUrl must not be empty",
                "Set apiBaseUrl in your tutor.json or the TUTOR_API_URL variable",
            ));
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TutorError::config_validation(
                format!("apiBaseUrl '{url}' must start with http:// or https://"),
                "Use a full URL such as http://localhost:8080 for apiBaseUrl",
            ));
        }

        if self.model_name.trim().is_empty() {
            return Err(TutorError::config_validation(
                "modelName must not be empty",
                "Set modelName in your tutor.json (for example gemini-2.5-flash)",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your tutor.json",
            ));
        }

        if self.retry.base_delay_ms == 0 {
            return Err(TutorError::config_validation(
                "retry.baseDelayMs must be greater than 0",
                "Set retry.baseDelayMs to at least 1 in your tutor.json",
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(TutorError::config_validation(
                "retry.maxDelayMs must not be smaller than retry.baseDelayMs",
                "Raise retry.maxDelayMs or lower retry.baseDelayMs in your tutor.json",
            ));
        }

        if self.output_dir.trim().is_empty() {
            return Err(TutorError::config_validation(
                "outputDir must not be empty",
                "Provide a valid output directory path in your tutor.json (use '.' for current directory)",
            ));
        }

        Ok(())
    }
}

/// Backoff settings for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    /// Maximum retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Which endpoint grades a solo answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SoloGrading {
    /// Send the answer to `generate-steps` as `student_answer` (default).
    #[default]
    Steps,
    /// Send the answer to `grade-answer`.
    GradeEndpoint,
}

impl SoloGrading {
    /// Parses a string into a `SoloGrading`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "steps" => Some(Self::Steps),
            "gradeendpoint" | "grade_endpoint" | "grade-endpoint" => Some(Self::GradeEndpoint),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for SoloGrading {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid solo grading '{s}': expected one of 'steps', 'gradeEndpoint'"
            ))
        })
    }
}

impl Serialize for SoloGrading {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Steps => "steps",
            Self::GradeEndpoint => "gradeEndpoint",
        };
        serializer.serialize_str(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.model_name, "gemini-2.5-flash");
        assert!(config.api_key.is_none());
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.default_mode, Mode::Solo);
        assert_eq!(config.solo_grading, SoloGrading::Steps);
        assert!(config.offline_fallback);
        assert!(!config.force_offline);
        assert_eq!(config.output_dir, ".");
    }

    #[test]
    fn test_retry_settings_default_values() {
        let retry = RetrySettings::default();

        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.base_delay_ms, 1000);
        assert_eq!(retry.max_delay_ms, 10_000);
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "apiBaseUrl": "https://tutor.example.com",
            "modelName": "gemini-2.5-pro",
            "defaultMode": "Assist",
            "soloGrading": "gradeEndpoint",
            "retry": { "maxRetries": 5 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.api_base_url, "https://tutor.example.com");
        assert_eq!(config.model_name, "gemini-2.5-pro");
        assert_eq!(config.default_mode, Mode::Assist);
        assert_eq!(config.solo_grading, SoloGrading::GradeEndpoint);
        assert_eq!(config.retry.max_retries, 5);
        // Unset nested fields keep their defaults
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_mode_error() {
        let json = r#"{"defaultMode": "autopilot"}"#;
        let err = serde_json::from_str::<Config>(json).unwrap_err().to_string();
        assert!(err.contains("invalid mode"));
        assert!(err.contains("autopilot"));
    }

    #[test]
    fn test_invalid_solo_grading_error() {
        let json = r#"{"soloGrading": "vibes"}"#;
        let err = serde_json::from_str::<Config>(json).unwrap_err().to_string();
        assert!(err.contains("invalid solo grading"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"modelName": "m", "somethingElse": 1}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.model_name, "m");
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let config_path = std::env::temp_dir().join("test_tutor_valid.json");
        std::fs::write(
            &config_path,
            r#"{"apiBaseUrl": "http://127.0.0.1:9000", "requestTimeoutSecs": 5}"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.model_name, "gemini-2.5-flash");

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let config_path = std::env::temp_dir().join("test_tutor_invalid.json");
        std::fs::write(&config_path, b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/tutor.json")).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_load_from_dir_finds_tutor_json() {
        let dir = std::env::temp_dir().join("test_tutor_dir");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tutor.json"), r#"{"modelName": "dir-model"}"#).unwrap();

        let config = Config::load_from_dir(&dir).unwrap();
        assert_eq!(config.model_name, "dir-model");

        std::fs::remove_file(dir.join("tutor.json")).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_URL, "https://override.example.com"),
            (ENV_API_KEY, "secret"),
            (ENV_MODEL, ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.api_base_url, "https://override.example.com");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        // Blank values are ignored
        assert_eq!(config.model_name, "gemini-2.5-flash");
    }

    #[test]
    fn test_config_validation_rejects_bad_url() {
        let config = Config {
            api_base_url: "localhost:8080".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { message, .. } if message.contains("apiBaseUrl")),
            "Expected ConfigValidationError about apiBaseUrl, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_rejects_inverted_delays() {
        let config = Config {
            retry: RetrySettings {
                max_retries: 3,
                base_delay_ms: 5000,
                max_delay_ms: 1000,
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { message, .. } if message.contains("maxDelayMs")),
            "Expected ConfigValidationError about maxDelayMs, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_zero_timeout_and_empty_model() {
        let config = Config {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            model_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let config_path = std::env::temp_dir().join("test_tutor_validation.json");
        std::fs::write(&config_path, r#"{"requestTimeoutSecs": 0}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }
}
