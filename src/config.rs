//! Command-line and environment configuration
//!
//! Secrets come from the environment. They are validated up front so a
//! misconfigured daemon fails before it talks to anything.

use crate::error::{Error, Result};
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NOMAD_ADDR: &str = "https://127.0.0.1:4646";
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";
pub const DEFAULT_DD_SITE: &str = "datadoghq.com";

/// Spot notices arrive two minutes ahead; anything slower than this is a typo
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Nomad ACL token used to list nodes and trigger the drain
    #[arg(long, env = "SPOTDRAIN_NOMAD_TOKEN", hide_env_values = true)]
    pub nomad_token: Option<String>,

    /// Nomad HTTP API address
    #[arg(long, env = "NOMAD_ADDR", default_value = DEFAULT_NOMAD_ADDR)]
    pub nomad_addr: String,

    /// PEM CA certificate used to verify the Nomad API
    #[arg(long, env = "NOMAD_CACERT")]
    pub nomad_ca_cert: Option<PathBuf>,

    /// Skip TLS verification of the Nomad API
    #[arg(long, env = "NOMAD_SKIP_VERIFY")]
    pub nomad_skip_verify: bool,

    /// Datadog API key
    #[arg(long, env = "DD_CLIENT_API_KEY", hide_env_values = true)]
    pub dd_api_key: Option<String>,

    /// Datadog application key
    #[arg(long, env = "DD_CLIENT_APP_KEY", hide_env_values = true)]
    pub dd_app_key: Option<String>,

    /// Environment tag attached to the Datadog event
    #[arg(long, env = "DD_ENV")]
    pub dd_env: Option<String>,

    /// Datadog site
    #[arg(long, env = "DD_SITE", default_value = DEFAULT_DD_SITE)]
    pub dd_site: String,

    /// Instance metadata service endpoint
    #[arg(long, env = "AWS_EC2_METADATA_SERVICE_ENDPOINT", default_value = DEFAULT_IMDS_ENDPOINT)]
    pub imds_endpoint: String,

    /// Seconds between interruption checks
    #[arg(long, env = "SPOTDRAIN_POLL_INTERVAL_SECS", default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// Milliseconds an in-flight check may run after a shutdown signal
    #[arg(long, env = "SPOTDRAIN_SHUTDOWN_GRACE_MS", default_value_t = 500)]
    pub shutdown_grace_ms: u64,

    /// Per-request timeout for every remote call
    #[arg(long, env = "SPOTDRAIN_HTTP_TIMEOUT_SECS", default_value_t = 5)]
    pub http_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "SPOTDRAIN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated runtime configuration
#[derive(Clone)]
pub struct Config {
    pub nomad_token: String,
    pub nomad_addr: String,
    pub nomad_ca_cert: Option<PathBuf>,
    pub nomad_skip_verify: bool,
    pub dd_api_key: String,
    pub dd_app_key: String,
    pub dd_env: Option<String>,
    pub dd_site: String,
    pub imds_endpoint: String,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub http_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("nomad_token", &"<redacted>")
            .field("nomad_addr", &self.nomad_addr)
            .field("nomad_ca_cert", &self.nomad_ca_cert)
            .field("nomad_skip_verify", &self.nomad_skip_verify)
            .field("dd_api_key", &"<redacted>")
            .field("dd_app_key", &"<redacted>")
            .field("dd_env", &self.dd_env)
            .field("dd_site", &self.dd_site)
            .field("imds_endpoint", &self.imds_endpoint)
            .field("poll_interval", &self.poll_interval)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

fn required(value: Option<String>, env: &str, what: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::ConfigError(format!(
            "{what} not present in environment variable {env}"
        ))),
    }
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let nomad_token = required(args.nomad_token, "SPOTDRAIN_NOMAD_TOKEN", "Nomad auth token")?;
        let dd_api_key = required(args.dd_api_key, "DD_CLIENT_API_KEY", "Datadog API key")?;
        let dd_app_key = required(args.dd_app_key, "DD_CLIENT_APP_KEY", "Datadog application key")?;

        if args.poll_interval_secs == 0 {
            return Err(Error::ConfigError(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if args.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            return Err(Error::ConfigError(format!(
                "poll interval must not exceed {MAX_POLL_INTERVAL_SECS} seconds"
            )));
        }
        if args.http_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "HTTP timeout must be at least one second".to_string(),
            ));
        }

        let dd_env = args.dd_env.filter(|e| !e.trim().is_empty());

        Ok(Self {
            nomad_token,
            nomad_addr: args.nomad_addr.trim_end_matches('/').to_string(),
            nomad_ca_cert: args.nomad_ca_cert,
            nomad_skip_verify: args.nomad_skip_verify,
            dd_api_key,
            dd_app_key,
            dd_env,
            dd_site: args.dd_site,
            imds_endpoint: args.imds_endpoint.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
            http_timeout: Duration::from_secs(args.http_timeout_secs),
        })
    }

    /// Base URL of the Datadog API for the configured site
    pub fn datadog_url(&self) -> String {
        format!("https://api.{}", self.dd_site)
    }
}
