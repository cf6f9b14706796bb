use std::path::PathBuf;

use clap::Parser;

/// Continuously capture system traces, upload each one to S3 and log
/// summary statistics about it.
///
/// Every option may also come from the TOML file given with `--config`;
/// command-line and environment values win over the file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "roadcrew", version, about)]
pub struct CliArgs {
    /// Capture interval in seconds; each trace covers this long
    #[arg(short = 'i', long = "interval", value_name = "SECS")]
    pub interval: Option<u64>,

    /// Destination bucket name
    #[arg(short = 'b', long = "bucket", value_name = "NAME")]
    pub bucket: Option<String>,

    /// Access key id
    #[arg(short = 'K', long = "access-key", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// Secret access key
    #[arg(short = 'S', long = "secret-key", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Bucket region [default: us-east-1]
    #[arg(short = 'r', long = "region")]
    pub region: Option<String>,

    /// Directory for trace files awaiting upload [default: /tmp]
    #[arg(short = 't', long = "tmp-dir", value_name = "DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Time allowed for uploading and summarizing one trace [default: the interval]
    #[arg(long = "handling-timeout", value_name = "SECS")]
    pub handling_timeout: Option<u64>,

    /// Grace period between interrupting and killing the capture tool [default: 10]
    #[arg(long = "kill-grace", value_name = "SECS")]
    pub kill_grace: Option<u64>,

    /// Maximum number of traces being uploaded at once [default: 4]
    #[arg(long = "max-in-flight", value_name = "N")]
    pub max_in_flight: Option<usize>,

    /// Upload attempts per trace before giving up [default: 3]
    #[arg(long = "upload-attempts", value_name = "N")]
    pub upload_attempts: Option<u32>,

    /// Delay before the first upload retry, doubled on each retry [default: 1000]
    #[arg(long = "retry-delay-ms", value_name = "MS")]
    pub retry_delay_ms: Option<u64>,

    /// S3-compatible endpoint URL
    #[arg(long = "endpoint", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Capture tool executable [default: sysdig]
    #[arg(long = "capture-program", value_name = "PATH")]
    pub capture_program: Option<String>,

    /// Skip the startup environment checks
    #[arg(long = "skip-preflight", action = clap::ArgAction::SetTrue)]
    pub skip_preflight: bool,
}
