use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::TargetFormat;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; without it jobs live in memory
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    /// OpenAI-compatible endpoint (Azure, proxies); defaults to api.openai.com
    pub openai_base_url: Option<String>,
    pub tavily_api_key: Option<String>,
    pub max_parallel_jobs: usize,
    pub poll_interval: Duration,
    pub nominal_job_duration: Duration,
    pub retention_days: i64,
    pub worker_id: String,
    pub shutdown_grace: Duration,
    pub output_dir: PathBuf,
    pub blob_store_url: Option<String>,
    pub blob_store_token: Option<String>,
    pub blob_bucket: String,
    pub enhance_callouts: bool,
    pub convert_format: TargetFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let max_parallel_jobs: usize = parse_var("MAX_PARALLEL_JOBS", 3)?;
        if max_parallel_jobs == 0 {
            return Err(anyhow!("MAX_PARALLEL_JOBS must be at least 1"));
        }
        let retention_days = retention_days(parse_var("RETENTION_DAYS", 30)?)?;

        Ok(Self {
            database_url: optional_var("DATABASE_URL"),
            openai_api_key: optional_var("OPENAI_API_KEY"),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            openai_base_url: optional_var("OPENAI_BASE_URL"),
            tavily_api_key: optional_var("TAVILY_API_KEY"),
            max_parallel_jobs,
            poll_interval: Duration::from_secs(parse_var("POLL_INTERVAL_SECONDS", 5)?),
            nominal_job_duration: Duration::from_secs(parse_var(
                "NOMINAL_JOB_DURATION_SECONDS",
                600,
            )?),
            retention_days,
            worker_id: env::var("WORKER_ID")
                .unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4())),
            shutdown_grace: Duration::from_secs(parse_var("SHUTDOWN_GRACE_SECONDS", 300)?),
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./output")),
            blob_store_url: optional_var("BLOB_STORE_URL"),
            blob_store_token: optional_var("BLOB_STORE_TOKEN"),
            blob_bucket: env::var("BLOB_BUCKET")
                .unwrap_or_else(|_| "generated-documents".to_string()),
            enhance_callouts: parse_var("ENHANCE_CALLOUTS", true)?,
            convert_format: parse_var("CONVERT_FORMAT", TargetFormat::Html)?,
        })
    }

    /// The OpenAI key; the worker cannot run without it.
    pub fn require_openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY must be set")
    }
}

fn retention_days(days: i64) -> Result<i64> {
    if days < 0 {
        return Err(anyhow!("RETENTION_DAYS must not be negative, got {}", days));
    }
    Ok(days)
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("{} must be a valid value, got {:?}", key, raw)),
        None => Ok(default),
    }
}
