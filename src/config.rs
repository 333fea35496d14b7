//! Service configuration.
//!
//! Loaded once at startup, optionally from a TOML file, then overridden from the
//! environment (a `.env` file is honoured). Credentials normally come from the
//! environment only.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::scheduler::{DEFAULT_DELETE_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, SchedulerConfig};
use crate::store::CloudinaryConfig;
use crate::upload::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_UPLOAD_FOLDER, UploadPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to load .env file: {0}")]
    EnvFile(#[source] dotenvy::Error),
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
    pub upload_folder: String,
    pub store_timeout_secs: u64,
    pub deletion_delay_secs: u64,
    pub deletion_workers: usize,
    pub deletion_queue_capacity: usize,
    pub deletion_timeout_secs: u64,
    pub log_level: String,
    pub json_logs: bool,
    pub cloudinary: CloudinaryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            upload_folder: DEFAULT_UPLOAD_FOLDER.to_string(),
            store_timeout_secs: 30,
            deletion_delay_secs: 60,
            deletion_workers: DEFAULT_WORKERS,
            deletion_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            deletion_timeout_secs: DEFAULT_DELETE_TIMEOUT.as_secs(),
            log_level: "info".to_string(),
            json_logs: false,
            cloudinary: CloudinaryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment, after loading `.env`.
    ///
    /// Reads:
    /// - `CLOUD_NAME`, `API_KEY`, `API_SECRET` (Cloudinary credentials)
    /// - `CLOUDINARY_API_BASE`
    /// - `DOMINANT_BIND`, `DOMINANT_MAX_UPLOAD_BYTES`, `DOMINANT_UPLOAD_FOLDER`
    /// - `DOMINANT_STORE_TIMEOUT_SECS`, `DOMINANT_DELETION_DELAY_SECS`
    /// - `DOMINANT_DELETION_WORKERS`, `DOMINANT_DELETION_QUEUE_CAPACITY`
    /// - `DOMINANT_DELETION_TIMEOUT_SECS`, `CLOUDINARY_TIMEOUT_SECS`
    ///
    /// A missing `.env` is fine; one that exists but cannot be read or parsed is an error.
    pub fn with_process_env(self) -> Result<Self, ConfigError> {
        env_file_loaded(dotenvy::dotenv().map(drop))?;
        self.with_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("CLOUD_NAME") {
            self.cloudinary.cloud_name = v;
        }
        if let Some(v) = lookup("API_KEY") {
            self.cloudinary.api_key = v;
        }
        if let Some(v) = lookup("API_SECRET") {
            self.cloudinary.api_secret = v;
        }
        if let Some(v) = lookup("CLOUDINARY_API_BASE") {
            self.cloudinary.api_base = v;
        }
        if let Some(v) = lookup("DOMINANT_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("DOMINANT_UPLOAD_FOLDER") {
            self.upload_folder = v;
        }
        parse_into(&lookup, "DOMINANT_MAX_UPLOAD_BYTES", &mut self.max_upload_bytes)?;
        parse_into(&lookup, "DOMINANT_STORE_TIMEOUT_SECS", &mut self.store_timeout_secs)?;
        parse_into(&lookup, "DOMINANT_DELETION_DELAY_SECS", &mut self.deletion_delay_secs)?;
        parse_into(&lookup, "DOMINANT_DELETION_WORKERS", &mut self.deletion_workers)?;
        parse_into(&lookup, "DOMINANT_DELETION_QUEUE_CAPACITY", &mut self.deletion_queue_capacity)?;
        parse_into(&lookup, "DOMINANT_DELETION_TIMEOUT_SECS", &mut self.deletion_timeout_secs)?;
        parse_into(&lookup, "CLOUDINARY_TIMEOUT_SECS", &mut self.cloudinary.request_timeout_secs)?;
        Ok(self)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloudinary.cloud_name.is_empty() {
            return Err(ConfigError::Missing("CLOUD_NAME"));
        }
        if self.cloudinary.api_key.is_empty() {
            return Err(ConfigError::Missing("API_KEY"));
        }
        if self.cloudinary.api_secret.is_empty() {
            return Err(ConfigError::Missing("API_SECRET"));
        }
        for (key, value) in [
            ("max_upload_bytes", self.max_upload_bytes),
            ("deletion_workers", self.deletion_workers),
            ("deletion_queue_capacity", self.deletion_queue_capacity),
            ("deletion_timeout_secs", self.deletion_timeout_secs as usize),
            ("cloudinary.request_timeout_secs", self.cloudinary.request_timeout_secs as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                });
            }
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid {
                key: "allowed_extensions",
                value: "[]".into(),
            });
        }
        Ok(())
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_bytes: self.max_upload_bytes,
            allowed_extensions: self
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect::<BTreeSet<_>>(),
            folder: self.upload_folder.clone(),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            delay: Duration::from_secs(self.deletion_delay_secs),
            workers: self.deletion_workers,
            queue_capacity: self.deletion_queue_capacity,
            delete_timeout: Duration::from_secs(self.deletion_timeout_secs),
        }
    }
}

fn env_file_loaded(result: Result<(), dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Err(e) if !e.not_found() => Err(ConfigError::EnvFile(e)),
        _ => Ok(()),
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = AppConfig::default();
        assert_eq!(config.max_upload_bytes, 3 * 1024 * 1024);
        assert_eq!(config.scheduler_config().delay, Duration::from_secs(60));
        assert_eq!(config.upload_policy().folder, "temp_uploads");
        assert!(config.upload_policy().allowed_extensions.contains("jpeg"));
    }

    #[test]
    fn env_supplies_credentials_and_overrides() {
        let config = AppConfig::default()
            .with_env(env(&[
                ("CLOUD_NAME", "demo"),
                ("API_KEY", "key"),
                ("API_SECRET", "secret"),
                ("DOMINANT_DELETION_DELAY_SECS", "5"),
            ]))
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.cloudinary.cloud_name, "demo");
        assert_eq!(config.scheduler_config().delay, Duration::from_secs(5));
    }

    #[test]
    fn timeouts_come_from_env() {
        let config = AppConfig::default()
            .with_env(env(&[
                ("DOMINANT_DELETION_TIMEOUT_SECS", "7"),
                ("CLOUDINARY_TIMEOUT_SECS", "12"),
            ]))
            .unwrap();
        assert_eq!(config.scheduler_config().delete_timeout, Duration::from_secs(7));
        assert_eq!(config.cloudinary.request_timeout_secs, 12);
        assert_eq!(
            AppConfig::default().scheduler_config().delete_timeout,
            DEFAULT_DELETE_TIMEOUT
        );
    }

    #[test]
    fn zero_deletion_timeout_is_rejected() {
        let mut config = AppConfig::default()
            .with_env(env(&[("CLOUD_NAME", "c"), ("API_KEY", "k"), ("API_SECRET", "s")]))
            .unwrap();
        config.deletion_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "deletion_timeout_secs", .. })
        ));
    }

    #[test]
    fn absent_env_file_is_fine_but_broken_one_is_an_error() {
        let missing = dotenvy::Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(env_file_loaded(Err(missing)).is_ok());
        assert!(env_file_loaded(Ok(())).is_ok());

        let broken = dotenvy::Error::LineParse("KEY VALUE".into(), 3);
        assert!(matches!(env_file_loaded(Err(broken)), Err(ConfigError::EnvFile(_))));
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CLOUD_NAME")));
    }

    #[test]
    fn bad_number_is_reported_with_its_key() {
        let err = AppConfig::default()
            .with_env(env(&[("DOMINANT_DELETION_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DOMINANT_DELETION_WORKERS", .. }));
    }

    #[test]
    fn toml_file_fills_unset_fields_with_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            bind = "0.0.0.0:8080"
            allowed_extensions = [".PNG", "webp"]

            [cloudinary]
            cloud_name = "demo"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.deletion_workers, DEFAULT_WORKERS);
        assert_eq!(config.cloudinary.api_base, crate::store::DEFAULT_API_BASE);
        let policy = config.upload_policy();
        assert!(policy.allowed_extensions.contains("png"));
        assert!(policy.allowed_extensions.contains("webp"));
    }
}
