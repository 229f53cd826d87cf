//! Typed configuration
//!
//! Configuration comes from an optional file (any format the `config`
//! crate understands) overridden by `CCXEXPORTER_`-prefixed environment
//! variables, `.` replaced by `_` (e.g. `CCXEXPORTER_METRICS_PORT`).
//! Keys are camelCase so the environment separator stays unambiguous;
//! lookups are case-insensitive. Durations are human-readable strings
//! ("8s", "1m").

use crate::pipeline::RetryConfig;
use ::config::{Environment, File};
use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CCXEXPORTER";

/// Serde helper parsing humantime duration strings.
pub mod duration_string {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    /// Deserialize a `Duration` from a string like "8s" or "1m".
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Budget for graceful shutdown
    #[serde(
        alias = "gracefulDuration",
        alias = "gracefulduration",
        deserialize_with = "duration_string::deserialize"
    )]
    pub graceful_duration: Duration,
    /// Metrics exposition
    pub metrics: MetricsConfig,
    /// Logging
    pub logs: LogsConfig,
    /// Kafka broker and consumer group
    pub kafka: KafkaConfig,
    /// Host-state cache
    pub valkey: ValkeyConfig,
    /// Projection outputs
    pub output: OutputConfig,
    /// Dead-letter store
    #[serde(alias = "deadLetterQueue", alias = "deadletterqueue")]
    pub dead_letter_queue: S3Config,
    /// Pipeline tuning
    pub processing: ProcessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graceful_duration: Duration::from_secs(8),
            metrics: MetricsConfig::default(),
            logs: LogsConfig::default(),
            kafka: KafkaConfig::default(),
            valkey: ValkeyConfig::default(),
            output: OutputConfig::default(),
            dead_letter_queue: S3Config::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// Metrics HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Port the `/metrics` endpoint listens on
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 7777 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Verbosity: 0 error, 1 warn, 2 info, 3 debug, 4+ trace
    pub level: i32,
    /// Output encoder
    pub encoder: LogEncoder,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: 4,
            encoder: LogEncoder::Console,
        }
    }
}

/// Log output encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoder {
    /// Human-readable single-line output
    Console,
    /// Structured JSON output
    Json,
}

/// Kafka settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Broker connection settings
    pub broker: KafkaBrokerConfig,
    /// Consumer group settings
    pub consumer: KafkaConsumerConfig,
}

/// Kafka broker connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KafkaBrokerConfig {
    /// Comma-separated broker addresses
    pub urls: String,
    /// Broker version hint forwarded to the client
    pub version: String,
    /// Enable TLS transport
    #[serde(alias = "useTLS", alias = "usetls")]
    pub use_tls: bool,
    /// Authentication settings
    pub creds: KafkaCredsConfig,
}

/// Kafka credentials.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct KafkaCredsConfig {
    /// SASL user
    pub user: String,
    /// SASL password
    pub password: String,
    /// Authenticate with SCRAM-SHA-512
    #[serde(alias = "useSCRAMSHA512Auth", alias = "usescramsha512auth")]
    pub use_scram_sha512_auth: bool,
}

impl fmt::Debug for KafkaCredsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() && self.password.is_empty() {
            return write!(f, "no creds");
        }

        write!(f, "creds set")
    }
}

/// Kafka consumer group settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KafkaConsumerConfig {
    /// Comma-separated list of topics to consume
    pub topic: String,
    /// Consumer group id
    pub group: String,
}

impl KafkaConsumerConfig {
    /// Topics as a list.
    pub fn topics(&self) -> Vec<&str> {
        self.topic
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .collect()
    }
}

/// Host-state cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValkeyConfig {
    /// `host:port` of the cache
    pub url: String,
    /// Cluster-entry TTL
    #[serde(deserialize_with = "duration_string::deserialize")]
    pub ttl: Duration,
    /// Authentication settings
    pub creds: ValkeyCredsConfig,
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ttl: Duration::from_secs(60),
            creds: ValkeyCredsConfig::default(),
        }
    }
}

/// Cache credentials.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValkeyCredsConfig {
    /// Password, empty to disable authentication
    pub password: String,
}

impl fmt::Debug for ValkeyCredsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.password.is_empty() {
            return write!(f, "no password");
        }

        write!(f, "password set")
    }
}

/// Projection output settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// One writer per entry; multiple entries fan out in parallel
    pub s3: Vec<S3Config>,
}

/// One S3-compatible store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// Key prefix prepended to every object
    #[serde(alias = "keyPrefix", alias = "keyprefix")]
    pub key_prefix: String,
    /// Endpoint override for S3-compatible stores
    #[serde(alias = "baseEndpoint", alias = "baseendpoint")]
    pub base_endpoint: String,
    /// Region
    pub region: String,
    /// Use path-style addressing
    #[serde(alias = "usePathStyle", alias = "usepathstyle")]
    pub use_path_style: bool,
    /// Static credentials
    pub creds: AwsCredsConfig,
    /// Directory holding credential files; when set, `accessKeyID` and
    /// `secretAccessKey` are read from files of those names
    #[serde(alias = "secretPath", alias = "secretpath")]
    pub secret_path: Option<PathBuf>,
}

/// Static AWS credentials.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsCredsConfig {
    /// Access key id
    #[serde(alias = "accessKeyID", alias = "accesskeyid")]
    pub access_key_id: String,
    /// Secret access key
    #[serde(alias = "secretAccessKey", alias = "secretaccesskey")]
    pub secret_access_key: String,
}

impl fmt::Debug for AwsCredsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.access_key_id.is_empty() && !self.secret_access_key.is_empty() {
            return write!(f, "creds set");
        }

        write!(f, "no creds")
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Retry policy shared by the main and error stacks
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    /// and resolve credential files.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("_"));

        let mut conf: Config = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        for s3 in &mut conf.output.s3 {
            s3.resolve_secrets()?;
        }
        conf.dead_letter_queue.resolve_secrets()?;

        Ok(conf)
    }
}

impl S3Config {
    fn resolve_secrets(&mut self) -> anyhow::Result<()> {
        let Some(dir) = &self.secret_path else {
            return Ok(());
        };

        self.creds.access_key_id = read_secret(dir, "accessKeyID")?;
        self.creds.secret_access_key = read_secret(dir, "secretAccessKey")?;

        Ok(())
    }
}

fn read_secret(dir: &Path, name: &str) -> anyhow::Result<String> {
    let path = dir.join(name);

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read secret file {}", path.display()))?;

    Ok(raw.trim().to_string())
}
