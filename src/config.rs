use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::domain::{RunQuery, RunStatus, StreamParams};
use crate::error::SyncError;
use crate::sync::FeedOptions;
use crate::sync::connector::DEFAULT_STREAM_PATH;
use crate::sync::fetcher::DEFAULT_RUNS_PATH;

/// Config file looked up in the working directory when none is given.
const DEFAULT_CONFIG_NAME: &str = "run-sync";

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch agent runs live", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Base URL of the runs API
    #[arg(long, env = "RUNS_API_URL")]
    pub base_url: Option<String>,

    /// Only follow runs of this agent
    #[arg(long, env = "RUNS_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Only follow runs in this status
    #[arg(long, env = "RUNS_STATUS")]
    pub status: Option<String>,

    /// Capacity of the run list
    #[arg(long, env = "RUNS_MAX")]
    pub max_runs: Option<usize>,

    /// Delay before reconnecting a failed stream
    #[arg(long, env = "RUNS_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub runs_path: String,
    pub stream_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub max_runs: usize,
    pub retry_delay_ms: u64,
}

/// Run filter. `from`/`to` only narrow the snapshot, never the stream.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layering, lowest first: defaults, config file, `RUNSYNC_` env vars,
    /// CLI flags (which also read their own env vars).
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.base_url", "http://127.0.0.1:3000")?
            .set_default("server.runs_path", DEFAULT_RUNS_PATH)?
            .set_default("server.stream_path", DEFAULT_STREAM_PATH)?
            .set_default("feed.max_runs", 50)?
            .set_default("feed.retry_delay_ms", 5000)?
            .set_default("log.json", false)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        // E.g. RUNSYNC_FEED__MAX_RUNS=20
        builder = builder.add_source(
            Environment::with_prefix("RUNSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = cli.base_url {
            builder = builder.set_override("server.base_url", url)?;
        }
        if let Some(agent_id) = cli.agent_id {
            builder = builder.set_override("filter.agent_id", agent_id)?;
        }
        if let Some(status) = cli.status {
            builder = builder.set_override("filter.status", status)?;
        }
        if let Some(max) = cli.max_runs {
            builder = builder.set_override("feed.max_runs", max as u64)?;
        }
        if let Some(delay) = cli.retry_delay_ms {
            builder = builder.set_override("feed.retry_delay_ms", delay)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("log.json", json)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn base_url(&self) -> Result<Url, SyncError> {
        Ok(Url::parse(&self.server.base_url)?)
    }

    pub fn stream_params(&self) -> Result<StreamParams, SyncError> {
        Ok(StreamParams {
            agent_id: self.filter.agent_id.clone(),
            status: self.status_filter()?,
        })
    }

    /// Snapshot filter; `None` when it would equal the stream params.
    pub fn initial_fetch(&self) -> Result<Option<RunQuery>, SyncError> {
        if self.filter.from.is_none() && self.filter.to.is_none() {
            return Ok(None);
        }
        Ok(Some(RunQuery {
            agent_id: self.filter.agent_id.clone(),
            status: self.status_filter()?,
            from: parse_timestamp("filter.from", self.filter.from.as_deref())?,
            to: parse_timestamp("filter.to", self.filter.to.as_deref())?,
        }))
    }

    pub fn feed_options(&self) -> Result<FeedOptions, SyncError> {
        if self.feed.max_runs == 0 {
            return Err(SyncError::Config("feed.max_runs must be at least 1".into()));
        }
        Ok(FeedOptions {
            initial_fetch: self.initial_fetch()?,
            max_runs: self.feed.max_runs,
            retry_delay: Duration::from_millis(self.feed.retry_delay_ms),
        })
    }

    fn status_filter(&self) -> Result<Option<RunStatus>, SyncError> {
        self.filter
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<RunStatus>().map_err(SyncError::Config))
            .transpose()
    }
}

fn parse_timestamp(key: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, SyncError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SyncError::Config(format!("{key}: {e}")))
    })
    .transpose()
}
