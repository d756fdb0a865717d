use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result as ApiResult;
use crate::json_compare::{ContainmentFlag, JsonCompareMode};
use crate::poller::{LogStrategy, PollSpec};
use crate::transport::ExpectedStatus;
use crate::xml_compare::XmlCompareMode;

/// apiverify - call declared API methods and verify their responses
#[derive(Parser, Debug)]
#[command(name = "apiverify")]
#[command(about = "Call declared API methods and verify their responses")]
#[command(version = crate::VERSION)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path; repeat to layer several files
    #[arg(short, long, global = true)]
    pub config: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Call a declared method, optionally polling and validating the response
    Call(CallArgs),

    /// List declared methods
    Methods,

    /// Print the `{crypt:...}` token for a value, using the configured crypto key
    Encrypt(EncryptArgs),
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Name of the declared method
    pub method: String,

    /// Properties for template rendering (key=value format)
    #[arg(short, long = "property")]
    pub properties: Vec<String>,

    /// URL placeholder values (name=value format)
    #[arg(short, long = "url-param")]
    pub url_params: Vec<String>,

    /// Session id sent as the auth cookie
    #[arg(long)]
    pub session: Option<String>,

    /// Assert the method's declared successful status
    #[arg(long)]
    pub expect_success: bool,

    /// Poll every N milliseconds until a 2xx response, or the declared status with --expect-success
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Give up polling after N milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Which poll attempts to log (all, last-only, none)
    #[arg(long)]
    pub log_strategy: Option<LogStrategy>,

    /// Validate the response against the method's response template
    #[arg(long)]
    pub validate: bool,

    /// JSON compare mode (strict, lenient, non-extensible, strict-order)
    #[arg(long)]
    pub mode: Option<JsonCompareMode>,

    /// XML compare mode (strict, non-strict, ignore-attributes, only-known-fields)
    #[arg(long)]
    pub xml_mode: Option<XmlCompareMode>,

    /// Validation flags, e.g. array_contains or array_contains:items
    #[arg(long = "flag")]
    pub flags: Vec<ContainmentFlag>,

    /// Validate the response against a schema resource
    #[arg(long)]
    pub schema: Option<String>,
}

impl CallArgs {
    /// Polling is requested by either poll option
    pub fn polls(&self) -> bool {
        self.poll_interval_ms.is_some() || self.timeout_ms.is_some()
    }

    /// Apply the poll options to `spec`. With `--expect-success` polling stops on the
    /// method's declared status instead of any 2xx.
    pub fn poll_spec<F>(&self, mut spec: PollSpec, successful_status: F) -> ApiResult<PollSpec>
    where
        F: FnOnce() -> ApiResult<ExpectedStatus>,
    {
        if let Some(interval) = self.poll_interval_ms {
            spec.interval = Duration::from_millis(interval);
        }
        if let Some(timeout) = self.timeout_ms {
            spec.timeout = Duration::from_millis(timeout);
        }
        if let Some(strategy) = self.log_strategy {
            spec.log_strategy = strategy;
        }
        if self.expect_success {
            spec = spec.until_status(successful_status()?);
        }
        Ok(spec)
    }
}

#[derive(Args, Debug)]
pub struct EncryptArgs {
    /// Plain text to encrypt
    pub value: String,
}

/// Split `key=value`; the value may itself contain `=`
pub fn parse_key_value(entry: &str) -> Result<(String, String), String> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("Expected key=value, got '{}'", entry)),
    }
}
