use crate::backends::{
    BackendKind,
    b2::{self, B2Config},
    gcs::{self, GcsConfig},
};
use anyhow::{Context, Result, bail};
use chrono::Duration;
use clap::Parser;
use std::{env, fmt, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub bucket: String,
    pub b2_key_id: Option<String>,
    pub b2_application_key: Option<String>,
    pub b2_bucket_id: Option<String>,
    pub b2_token_ttl_hours: i64,
    pub gcs_service_account: Option<String>,
    pub gcs_metadata_host: String,
    pub cors_origins: Vec<String>,
    pub signed_url_ttl_secs: u64,
    pub upstream_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Song library API over GCS or Backblaze B2")]
pub struct Args {
    /// Host to bind to (overrides SONG_LIBRARY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SONG_LIBRARY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides SONG_LIBRARY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Bucket name (overrides SONG_LIBRARY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Comma-separated allowed CORS origins (overrides SONG_LIBRARY_CORS_ORIGINS)
    #[arg(long)]
    pub cors_origins: Option<String>,

    /// Default signed URL lifetime in seconds (overrides SONG_LIBRARY_SIGNED_URL_TTL)
    #[arg(long)]
    pub signed_url_ttl: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("SONG_LIBRARY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("SONG_LIBRARY_PORT", 3000)?;
        let env_backend = match optional_env("SONG_LIBRARY_BACKEND") {
            Some(value) => parse_backend(&value)?,
            None => BackendKind::B2,
        };
        let env_bucket = optional_env("SONG_LIBRARY_BUCKET");
        let env_cors = optional_env("SONG_LIBRARY_CORS_ORIGINS");
        let env_ttl = env_parse("SONG_LIBRARY_SIGNED_URL_TTL", 3600)?;

        // --- Merge ---
        let bucket = args
            .bucket
            .or(env_bucket)
            .context("a bucket name is required (SONG_LIBRARY_BUCKET or --bucket)")?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            bucket,
            b2_key_id: optional_env("B2_APPLICATION_KEY_ID"),
            b2_application_key: optional_env("B2_APPLICATION_KEY"),
            b2_bucket_id: optional_env("B2_BUCKET_ID"),
            b2_token_ttl_hours: env_parse("B2_TOKEN_TTL_HOURS", 23)?,
            gcs_service_account: optional_env("GCS_SERVICE_ACCOUNT"),
            gcs_metadata_host: env::var("GCS_METADATA_HOST")
                .unwrap_or_else(|_| gcs::DEFAULT_METADATA_HOST.into()),
            cors_origins: split_origins(args.cors_origins.or(env_cors).as_deref()),
            signed_url_ttl_secs: args.signed_url_ttl.unwrap_or(env_ttl),
            upstream_timeout_secs: env_parse("SONG_LIBRARY_UPSTREAM_TIMEOUT", 10)?,
            max_upload_bytes: env_parse("SONG_LIBRARY_MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.signed_url_ttl_secs == 0 || self.signed_url_ttl_secs > 604_800 {
            bail!(
                "signed URL ttl must be between 1 and 604800 seconds, got {}",
                self.signed_url_ttl_secs
            );
        }
        if self.b2_token_ttl_hours <= 0 || self.b2_token_ttl_hours > 24 {
            bail!("B2_TOKEN_TTL_HOURS must be between 1 and 24");
        }
        if self.backend == BackendKind::B2
            && (self.b2_key_id.is_none() || self.b2_application_key.is_none())
        {
            bail!("the b2 backend needs B2_APPLICATION_KEY_ID and B2_APPLICATION_KEY");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn b2(&self) -> Result<B2Config> {
        Ok(B2Config {
            key_id: self.b2_key_id.clone().context("B2_APPLICATION_KEY_ID is not set")?,
            application_key: self
                .b2_application_key
                .clone()
                .context("B2_APPLICATION_KEY is not set")?,
            bucket_name: self.bucket.clone(),
            bucket_id: self.b2_bucket_id.clone(),
            api_base: b2::DEFAULT_API_BASE.into(),
            token_ttl: Duration::hours(self.b2_token_ttl_hours),
        })
    }

    pub fn gcs(&self) -> GcsConfig {
        GcsConfig {
            bucket: self.bucket.clone(),
            service_account: self.gcs_service_account.clone(),
            metadata_host: self.gcs_metadata_host.clone(),
            api_base: gcs::DEFAULT_API_BASE.into(),
            iam_base: gcs::DEFAULT_IAM_BASE.into(),
        }
    }
}

// The application key stays out of logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("b2_key_id", &self.b2_key_id)
            .field("b2_bucket_id", &self.b2_bucket_id)
            .field("gcs_service_account", &self.gcs_service_account)
            .field("cors_origins", &self.cors_origins)
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "b2" | "backblaze" => Ok(BackendKind::B2),
        "gcs" | "google" => Ok(BackendKind::Gcs),
        other => bail!("unknown storage backend `{}` (expected b2 or gcs)", other),
    }
}

fn split_origins(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
