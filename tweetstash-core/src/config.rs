use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

const ENV_BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
const ENV_BUCKET: &str = "AWS_S3_BUCKET";
const ENV_KEYWORD: &str = "TWITTER_KEYWORD";
const ENV_BATCH_SIZE: &str = "TWEETSTASH_BATCH_SIZE";
const ENV_RUN_DURATION_SECS: &str = "TWEETSTASH_RUN_DURATION_SECS";
const ENV_STAGING_DIR: &str = "TWEETSTASH_STAGING_DIR";
const ENV_QUEUE_HIGH_WATER_MARK: &str = "TWEETSTASH_QUEUE_HIGH_WATER_MARK";
const ENV_FLUSH_ON_SHUTDOWN: &str = "TWEETSTASH_FLUSH_ON_SHUTDOWN";
const ENV_UNIQUE_KEYS: &str = "TWEETSTASH_UNIQUE_KEYS";
const ENV_STREAM_URL: &str = "TWEETSTASH_STREAM_URL";
const ENV_METRICS_PORT: &str = "TWEETSTASH_METRICS_PORT";
const ENV_AWS_REGION: &str = "AWS_REGION";
const ENV_AWS_ENDPOINT_URL: &str = "AWS_ENDPOINT_URL";

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_RUN_DURATION_SECS: u64 = 900;
const DEFAULT_QUEUE_HIGH_WATER_MARK: usize = 10_000;
const DEFAULT_STREAM_URL: &str = "https://api.twitter.com";
const DEFAULT_METRICS_PORT: u16 = 2469;

/// Prefix of a storage destination that points at a local directory instead of a bucket.
const LOCAL_DESTINATION_SCHEME: &str = "file://";

/// Where flushed batches are written.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    S3 { bucket: String },
    Local { root: PathBuf },
}

impl Destination {
    fn parse(value: &str) -> Self {
        match value.strip_prefix(LOCAL_DESTINATION_SCHEME) {
            Some(root) => Destination::Local { root: root.into() },
            None => Destination::S3 {
                bucket: value.to_string(),
            },
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::S3 { bucket } => write!(f, "s3://{bucket}"),
            Destination::Local { root } => write!(f, "{LOCAL_DESTINATION_SCHEME}{}", root.display()),
        }
    }
}

/// Optional overrides for the AWS client, the rest comes from the default provider chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Clone)]
pub struct Settings {
    pub bearer_token: String,
    pub destination: Destination,
    pub keyword: String,
    pub batch_size: usize,
    pub run_duration: Duration,
    pub staging_dir: PathBuf,
    pub queue_high_water_mark: usize,
    /// Flush the partial batch left at shutdown. Off by default, records below the batch
    /// threshold at stop time are dropped unless this is set.
    pub flush_on_shutdown: bool,
    /// Append a random token to archive file names so flushes within the same second never
    /// overwrite each other.
    pub unique_keys: bool,
    pub stream_url: String,
    /// `None` disables the metrics server.
    pub metrics_port: Option<u16>,
    pub aws: AwsConfig,
}

// keep the bearer token out of the logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bearer_token", &"<redacted>")
            .field("destination", &self.destination)
            .field("keyword", &self.keyword)
            .field("batch_size", &self.batch_size)
            .field("run_duration", &self.run_duration)
            .field("staging_dir", &self.staging_dir)
            .field("queue_high_water_mark", &self.queue_high_water_mark)
            .field("flush_on_shutdown", &self.flush_on_shutdown)
            .field("unique_keys", &self.unique_keys)
            .field("stream_url", &self.stream_url)
            .field("metrics_port", &self.metrics_port)
            .field("aws", &self.aws)
            .finish()
    }
}

impl Settings {
    /// Loads the settings from the process environment, on top of a `.env` file if one is found
    /// in the working directory or its parents.
    pub fn from_env() -> Result<Self> {
        Self::load_layered(dotenvy::dotenv_iter(), std::env::vars())
    }

    /// Process variables win over the ones from the env file.
    fn load_layered(
        env_file: dotenvy::Result<dotenvy::Iter<File>>,
        process_vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut env_vars = env_file_vars(env_file);
        env_vars.extend(process_vars);
        Self::load(env_vars)
    }

    /// Loads the settings from the given environment variables. The bearer token, the storage
    /// destination and the keyword are required, everything else has a default.
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .collect();

        let get_var = |var: &str| -> Option<String> {
            env_vars
                .get(var)
                .map(|val| val.trim().to_string())
                .filter(|val| !val.is_empty())
        };

        let required = |var: &str| -> Result<String> {
            get_var(var)
                .ok_or_else(|| Error::Config(format!("Environment variable {var} is not set")))
        };

        let bearer_token = required(ENV_BEARER_TOKEN)?;
        let destination = Destination::parse(&required(ENV_BUCKET)?);
        let keyword = required(ENV_KEYWORD)?;

        let batch_size: usize =
            parse_or(get_var(ENV_BATCH_SIZE), ENV_BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(Error::Config(format!(
                "{ENV_BATCH_SIZE} must be greater than zero"
            )));
        }

        let run_duration_secs: u64 = parse_or(
            get_var(ENV_RUN_DURATION_SECS),
            ENV_RUN_DURATION_SECS,
            DEFAULT_RUN_DURATION_SECS,
        )?;

        let metrics_port: u16 = parse_or(
            get_var(ENV_METRICS_PORT),
            ENV_METRICS_PORT,
            DEFAULT_METRICS_PORT,
        )?;

        Ok(Self {
            bearer_token,
            destination,
            keyword,
            batch_size,
            run_duration: Duration::from_secs(run_duration_secs),
            staging_dir: get_var(ENV_STAGING_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            queue_high_water_mark: parse_or(
                get_var(ENV_QUEUE_HIGH_WATER_MARK),
                ENV_QUEUE_HIGH_WATER_MARK,
                DEFAULT_QUEUE_HIGH_WATER_MARK,
            )?,
            flush_on_shutdown: parse_or(
                get_var(ENV_FLUSH_ON_SHUTDOWN),
                ENV_FLUSH_ON_SHUTDOWN,
                false,
            )?,
            unique_keys: parse_or(get_var(ENV_UNIQUE_KEYS), ENV_UNIQUE_KEYS, false)?,
            stream_url: get_var(ENV_STREAM_URL)
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            metrics_port: (metrics_port != 0).then_some(metrics_port),
            aws: AwsConfig {
                region: get_var(ENV_AWS_REGION),
                endpoint_url: get_var(ENV_AWS_ENDPOINT_URL),
            },
        })
    }
}

/// A missing env file yields nothing, an unreadable or malformed one is logged and skipped.
fn env_file_vars(env_file: dotenvy::Result<dotenvy::Iter<File>>) -> Vec<(String, String)> {
    let vars = match env_file {
        Ok(iter) => iter.collect::<dotenvy::Result<Vec<_>>>(),
        Err(e) if e.not_found() => {
            debug!("No .env file found");
            return Vec::new();
        }
        Err(e) => Err(e),
    };

    vars.unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring the .env file");
        Vec::new()
    })
}

fn parse_or<T>(value: Option<String>, var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value
            .to_lowercase()
            .parse()
            .map_err(|e| Error::Config(format!("Failed to parse {var}={value}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_BEARER_TOKEN, "token"),
            (ENV_BUCKET, "archive-bucket"),
            (ENV_KEYWORD, "rust"),
        ]
    }

    #[test]
    fn test_load_defaults() {
        let settings = Settings::load(required_vars()).unwrap();

        assert_eq!(settings.bearer_token, "token");
        assert_eq!(
            settings.destination,
            Destination::S3 {
                bucket: "archive-bucket".to_string()
            }
        );
        assert_eq!(settings.keyword, "rust");
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.run_duration, Duration::from_secs(900));
        assert_eq!(settings.staging_dir, std::env::temp_dir());
        assert_eq!(settings.queue_high_water_mark, 10_000);
        assert!(!settings.flush_on_shutdown);
        assert!(!settings.unique_keys);
        assert_eq!(settings.stream_url, "https://api.twitter.com");
        assert_eq!(settings.metrics_port, Some(2469));
        assert_eq!(settings.aws, AwsConfig::default());
    }

    #[test]
    fn test_missing_required_vars() {
        for missing in [ENV_BEARER_TOKEN, ENV_BUCKET, ENV_KEYWORD] {
            let vars = required_vars()
                .into_iter()
                .filter(|(key, _)| *key != missing);

            match Settings::load(vars) {
                Err(Error::Config(msg)) => assert!(msg.contains(missing), "{msg}"),
                other => panic!("expected config error for {missing}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_required_var_is_missing() {
        let mut vars = required_vars();
        vars.push((ENV_KEYWORD, "  "));
        assert!(matches!(Settings::load(vars), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_overrides() {
        let mut vars = required_vars();
        vars.extend([
            (ENV_BUCKET, "file:///var/lib/tweetstash"),
            (ENV_BATCH_SIZE, "25"),
            (ENV_RUN_DURATION_SECS, "60"),
            (ENV_STAGING_DIR, "/tmp/staging"),
            (ENV_QUEUE_HIGH_WATER_MARK, "50"),
            (ENV_FLUSH_ON_SHUTDOWN, "TRUE"),
            (ENV_UNIQUE_KEYS, "true"),
            (ENV_STREAM_URL, "http://localhost:8080/"),
            (ENV_METRICS_PORT, "0"),
            (ENV_AWS_REGION, "eu-west-1"),
            (ENV_AWS_ENDPOINT_URL, "http://localhost:4566"),
        ]);

        let settings = Settings::load(vars).unwrap();
        assert_eq!(
            settings.destination,
            Destination::Local {
                root: PathBuf::from("/var/lib/tweetstash")
            }
        );
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.run_duration, Duration::from_secs(60));
        assert_eq!(settings.staging_dir, PathBuf::from("/tmp/staging"));
        assert_eq!(settings.queue_high_water_mark, 50);
        assert!(settings.flush_on_shutdown);
        assert!(settings.unique_keys);
        assert_eq!(settings.stream_url, "http://localhost:8080");
        assert_eq!(settings.metrics_port, None);
        assert_eq!(settings.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            settings.aws.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = required_vars();
        vars.push((ENV_BATCH_SIZE, "ten"));
        assert!(matches!(Settings::load(vars), Err(Error::Config(_))));

        let mut vars = required_vars();
        vars.push((ENV_BATCH_SIZE, "0"));
        assert!(matches!(Settings::load(vars), Err(Error::Config(_))));

        let mut vars = required_vars();
        vars.push((ENV_FLUSH_ON_SHUTDOWN, "maybe"));
        assert!(matches!(Settings::load(vars), Err(Error::Config(_))));
    }

    fn env_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, content.as_bytes()).unwrap();
        file
    }

    fn owned(vars: &[(&str, &str)]) -> Vec<(String, String)> {
        vars.iter()
            .map(|(key, val)| (key.to_string(), val.to_string()))
            .collect()
    }

    #[test]
    fn test_env_file_below_process_env() {
        let file = env_file(
            "TWITTER_BEARER_TOKEN=from-file\n\
             AWS_S3_BUCKET=file-bucket\n\
             TWITTER_KEYWORD=rust\n\
             TWEETSTASH_BATCH_SIZE=5\n",
        );

        let settings = Settings::load_layered(
            dotenvy::from_path_iter(file.path()),
            owned(&[(ENV_BEARER_TOKEN, "from-process"), (ENV_BATCH_SIZE, "20")]),
        )
        .unwrap();

        assert_eq!(settings.bearer_token, "from-process");
        assert_eq!(settings.batch_size, 20);
        assert_eq!(
            settings.destination,
            Destination::S3 {
                bucket: "file-bucket".to_string()
            }
        );
        assert_eq!(settings.keyword, "rust");
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dotenvy::from_path_iter(dir.path().join(".env"));

        let settings = Settings::load_layered(missing, owned(&required_vars())).unwrap();
        assert_eq!(settings.keyword, "rust");
    }

    #[test]
    fn test_malformed_env_file_is_ignored() {
        let file = env_file("TWITTER_KEYWORD=go\nnot a valid line\n");

        let settings = Settings::load_layered(
            dotenvy::from_path_iter(file.path()),
            owned(&required_vars()),
        )
        .unwrap();
        assert_eq!(settings.keyword, "rust");
        assert!(env_file_vars(dotenvy::from_path_iter(file.path())).is_empty());
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut vars = required_vars();
        vars.push((ENV_BEARER_TOKEN, "s3cr3t-value"));
        let settings = Settings::load(vars).unwrap();
        assert_eq!(settings.bearer_token, "s3cr3t-value");

        let debug = format!("{settings:?}");
        assert!(!debug.contains("s3cr3t-value"), "{debug}");
        assert!(debug.contains("<redacted>"));
        assert_eq!(settings.destination.to_string(), "s3://archive-bucket");
    }
}
