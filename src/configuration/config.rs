use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use super::cli::CliArgs;
use crate::capture::CaptureTool;
use crate::error_handling::types::ConfigError;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TMP_DIR: &str = "/tmp";
pub const DEFAULT_KILL_GRACE_SECS: u64 = 10;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Settings as read from the TOML file and the command line, before validation.
///
/// ```toml
/// interval = 60
/// bucket = "traces"
/// region = "eu-west-1"
/// tmp_dir = "/var/tmp/roadcrew"
/// max_in_flight = 2
///
/// [capture]
/// program = "/usr/local/bin/sysdig"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub interval: Option<u64>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub tmp_dir: Option<PathBuf>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    pub handling_timeout: Option<u64>,
    pub kill_grace: Option<u64>,
    pub max_in_flight: Option<usize>,
    pub upload_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub capture: CaptureTool,
}

/// Static credentials for the object store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: StoreCredentials,
}

/// Validated, immutable configuration for one run of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long each capture session runs before it is interrupted.
    pub capture_interval: Duration,
    /// How long a dispatched cycle may take to upload and summarize.
    pub handling_timeout: Duration,
    pub kill_grace: Duration,
    pub max_in_flight: usize,
    pub upload_attempts: u32,
    pub retry_delay: Duration,
    pub tmp_dir: PathBuf,
    pub store: StoreSettings,
    pub capture: CaptureTool,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        debug!("Loaded configuration file {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Reads the file named by `--config`, if any, and lays the command line over it.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        Ok(config)
    }

    /// Overrides every field that was given on the command line or in the environment.
    pub fn apply_args(&mut self, args: &CliArgs) {
        fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        set(&mut self.interval, &args.interval);
        set(&mut self.bucket, &args.bucket);
        set(&mut self.region, &args.region);
        set(&mut self.tmp_dir, &args.tmp_dir);
        set(&mut self.access_key_id, &args.access_key_id);
        set(&mut self.secret_access_key, &args.secret_access_key);
        set(&mut self.endpoint, &args.endpoint);
        set(&mut self.handling_timeout, &args.handling_timeout);
        set(&mut self.kill_grace, &args.kill_grace);
        set(&mut self.max_in_flight, &args.max_in_flight);
        set(&mut self.upload_attempts, &args.upload_attempts);
        set(&mut self.retry_delay_ms, &args.retry_delay_ms);
        if let Some(program) = &args.capture_program {
            self.capture.program = program.clone();
        }
    }

    pub fn validate(self) -> Result<PipelineConfig, ConfigError> {
        let interval = required(self.interval, "capture interval (-i)")?;
        if interval == 0 {
            return Err(ConfigError::NotInRange(
                "capture interval must be at least 1 second".to_string(),
            ));
        }
        let handling_timeout = self.handling_timeout.unwrap_or(interval);
        if handling_timeout == 0 {
            return Err(ConfigError::NotInRange(
                "handling timeout must be at least 1 second".to_string(),
            ));
        }
        let max_in_flight = self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        if max_in_flight == 0 {
            return Err(ConfigError::NotInRange(
                "max in flight must be at least 1".to_string(),
            ));
        }
        let upload_attempts = self.upload_attempts.unwrap_or(DEFAULT_UPLOAD_ATTEMPTS);
        if upload_attempts == 0 {
            return Err(ConfigError::NotInRange(
                "upload attempts must be at least 1".to_string(),
            ));
        }

        let bucket = non_empty(self.bucket, "bucket name (-b)")?;
        let region = non_empty(
            Some(self.region.unwrap_or_else(|| DEFAULT_REGION.to_string())),
            "region (-r)",
        )?;
        let access_key_id = non_empty(
            self.access_key_id,
            "access key id (-K or AWS_ACCESS_KEY_ID)",
        )?;
        let secret_access_key = non_empty(
            self.secret_access_key,
            "secret access key (-S or AWS_SECRET_ACCESS_KEY)",
        )?;
        if self.capture.program.trim().is_empty() {
            return Err(ConfigError::MissingValue("capture program".to_string()));
        }

        let tmp_dir = self
            .tmp_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR));
        if !tmp_dir.is_dir() {
            return Err(ConfigError::DirectoryDoesNotExist(format!(
                "{} is not a directory",
                tmp_dir.display()
            )));
        }

        Ok(PipelineConfig {
            capture_interval: Duration::from_secs(interval),
            handling_timeout: Duration::from_secs(handling_timeout),
            kill_grace: Duration::from_secs(self.kill_grace.unwrap_or(DEFAULT_KILL_GRACE_SECS)),
            max_in_flight,
            upload_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            tmp_dir,
            store: StoreSettings {
                bucket,
                region,
                endpoint: self.endpoint.filter(|e| !e.trim().is_empty()),
                credentials: StoreCredentials {
                    access_key_id,
                    secret_access_key,
                },
            },
            capture: self.capture,
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(name.to_string()))
}

fn non_empty(value: Option<String>, name: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingValue(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn minimal() -> Config {
        Config {
            interval: Some(30),
            bucket: Some("traces".into()),
            access_key_id: Some("AKIA".into()),
            secret_access_key: Some("secret".into()),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_fill_in_everything_optional() {
        let config = minimal().validate().unwrap();

        assert_eq!(config.capture_interval, Duration::from_secs(30));
        assert_eq!(config.handling_timeout, Duration::from_secs(30));
        assert_eq!(config.kill_grace, Duration::from_secs(DEFAULT_KILL_GRACE_SECS));
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.upload_attempts, DEFAULT_UPLOAD_ATTEMPTS);
        assert_eq!(config.retry_delay, Duration::from_millis(DEFAULT_RETRY_DELAY_MS));
        assert_eq!(config.tmp_dir, PathBuf::from(DEFAULT_TMP_DIR));
        assert_eq!(config.store.region, DEFAULT_REGION);
        assert_eq!(config.store.endpoint, None);
        assert_eq!(config.capture, CaptureTool::default());
    }

    #[test]
    fn handling_timeout_is_independent_of_interval() {
        let config = Config {
            handling_timeout: Some(300),
            ..minimal()
        }
        .validate()
        .unwrap();
        assert_eq!(config.capture_interval, Duration::from_secs(30));
        assert_eq!(config.handling_timeout, Duration::from_secs(300));
    }

    #[test]
    fn toml_file_is_overridden_by_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("roadcrew.toml");
        std::fs::write(
            &file,
            format!(
                r#"
interval = 60
bucket = "from-file"
region = "eu-west-1"
tmp_dir = "{}"
access_key_id = "file-key"
secret_access_key = "file-secret"
max_in_flight = 2

[capture]
program = "/usr/local/bin/sysdig"
"#,
                dir.path().display()
            ),
        )
        .unwrap();

        let args = CliArgs {
            config: Some(file),
            bucket: Some("from-cli".into()),
            interval: Some(15),
            ..CliArgs::default()
        };
        let config = Config::load(&args).unwrap().validate().unwrap();

        assert_eq!(config.store.bucket, "from-cli");
        assert_eq!(config.capture_interval, Duration::from_secs(15));
        assert_eq!(config.store.region, "eu-west-1");
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.tmp_dir, dir.path());
        assert_eq!(config.capture.program, "/usr/local/bin/sysdig");
        assert_eq!(config.capture.write_args, CaptureTool::default().write_args);
    }

    #[test]
    fn capture_program_flag_keeps_argument_templates() {
        let mut config = minimal();
        config.apply_args(&CliArgs::try_parse_from(["roadcrew", "--capture-program", "sd"]).unwrap());
        assert_eq!(config.capture.program, "sd");
        assert_eq!(config.capture.report_args, CaptureTool::default().report_args);
    }

    #[test]
    fn missing_bucket_and_credentials_are_rejected() {
        let err = Config {
            bucket: None,
            ..minimal()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue(ref v) if v.contains("bucket")));

        let err = Config {
            secret_access_key: Some("  ".into()),
            ..minimal()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue(ref v) if v.contains("secret")));
    }

    #[test]
    fn zero_values_are_out_of_range() {
        for config in [
            Config { interval: Some(0), ..minimal() },
            Config { handling_timeout: Some(0), ..minimal() },
            Config { max_in_flight: Some(0), ..minimal() },
            Config { upload_attempts: Some(0), ..minimal() },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::NotInRange(_))));
        }
    }

    #[test]
    fn missing_tmp_dir_is_rejected() {
        let err = Config {
            tmp_dir: Some(PathBuf::from("/nonexistent/roadcrew")),
            ..minimal()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::DirectoryDoesNotExist(_)));
    }

    #[test]
    fn unknown_keys_and_bad_types_fail_to_parse() {
        assert!(matches!(
            Config::from_toml_str("intervall = 5"),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("interval = \"five\""),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn secret_is_not_printed() {
        let config = minimal().validate().unwrap();
        let debug = format!("{:?}", config.store);
        assert!(debug.contains("AKIA"));
        assert!(!debug.contains("secret\""));
        assert!(debug.contains("<redacted>"));
    }
}
