use std::path::PathBuf;

use anyhow::{bail, Context as _};
use chrono::{DateTime, Duration as Delta, NaiveDateTime, Utc};
use clap::{Parser, ValueEnum};
use url::Url;

use crate::model::TIMESTAMP_FORMAT;
use crate::source::EventFilters;

/// Command-line surface. The original tool's two-letter flags survive as
/// long options (`--ct`, `--fm`, `--fp`); short flags are single
/// characters.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "activity-sync-worker",
    version,
    about = "Mirror contact-center activity into a relational store or webhook"
)]
pub struct Cli {
    /// Campaign id
    #[arg(short = 'c', long = "campaign", value_name = "ID")]
    pub campaign_id: String,

    /// Campaign access token
    #[arg(long = "ct", value_name = "TOKEN")]
    pub campaign_token: String,

    /// Contact-listing access token (defaults to the campaign token)
    #[arg(long = "lt", value_name = "TOKEN")]
    pub listing_token: Option<String>,

    /// Run mode
    #[arg(short = 'a', long = "action", value_enum)]
    pub action: Action,

    /// Start date, format YYYY-MM-DDTHH:MM:SS
    #[arg(short = 's', long = "start", value_name = "DATE", value_parser = parse_start_date)]
    pub start_date: Option<NaiveDateTime>,

    /// Sink URL: webhook endpoint or {mysql|postgres|sqlserver}://user:pass@host:port/db
    #[arg(long = "url", value_name = "URL")]
    pub sink_url: String,

    /// Worker count per pipeline stage
    #[arg(short = 'w', long = "workers", default_value_t = 64)]
    pub workers: usize,

    /// Maximum database connections (sink worker pool size)
    #[arg(short = 'd', long = "db-connections", default_value_t = 16)]
    pub db_connections: usize,

    /// Event filter
    #[arg(long = "fm", value_enum, value_name = "FILTER")]
    pub filter_mode: Option<FilterMode>,

    /// Task prefix filter, comma separated (e.g. fc_,qc_)
    #[arg(long = "fp", value_name = "PREFIXES")]
    pub task_prefixes: Option<String>,

    /// Source API base URL
    #[arg(long = "api-base", default_value = "https://api.dialfire.com")]
    pub api_base: String,

    /// Directory holding per-campaign resume files
    #[arg(long = "state-dir", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Directory for daily-rolled log files, in addition to the console
    #[arg(long = "log-dir", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

fn parse_start_date(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Re-emit each transaction to the sink URL
    Webhook,
    /// Import every contact with its whole task-log, then stop
    #[value(name = "db_init")]
    DbInit,
    /// Backfill transactions down to the start date, then stop
    #[value(name = "db_update")]
    DbUpdate,
    /// Backfill, then follow the live stream until terminated
    #[value(name = "db_sync")]
    DbSync,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    #[value(name = "updates_only")]
    UpdatesOnly,
    #[value(name = "hi_updates_only")]
    HiUpdatesOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbBackend {
    MySql,
    Postgres,
    SqlServer,
}

#[derive(Debug, Clone)]
pub struct DbTarget {
    pub backend: DbBackend,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub enum SinkTarget {
    Webhook(String),
    Database(DbTarget),
}

impl SinkTarget {
    pub fn parse(action: Action, raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(raw).context("invalid sink URL")?;
        if action == Action::Webhook {
            return match url.scheme() {
                "http" | "https" => Ok(SinkTarget::Webhook(raw.to_owned())),
                other => bail!("webhook mode needs an http(s) sink URL, got {other}://"),
            };
        }
        let backend = match url.scheme() {
            "mysql" => DbBackend::MySql,
            "postgres" | "postgresql" => DbBackend::Postgres,
            "sqlserver" | "mssql" => DbBackend::SqlServer,
            other => bail!("unsupported database scheme '{other}'"),
        };
        Ok(SinkTarget::Database(DbTarget { backend, url }))
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub campaign_id: String,
    pub campaign_token: String,
    pub listing_token: String,
    pub action: Action,
    pub explicit_start: Option<NaiveDateTime>,
    pub sink: SinkTarget,
    pub workers: usize,
    pub db_connections: usize,
    pub filters: EventFilters,
    pub api_base: String,
    pub state_dir: PathBuf,
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        if cli.workers == 0 || cli.db_connections == 0 {
            bail!("worker counts must be positive");
        }
        let sink = SinkTarget::parse(cli.action, &cli.sink_url)?;
        let filters = EventFilters {
            event_type: cli.filter_mode.map(|_| "update".to_owned()),
            hi_only: cli.filter_mode == Some(FilterMode::HiUpdatesOnly),
            task_prefixes: cli.task_prefixes,
        };
        Ok(Self {
            campaign_id: cli.campaign_id,
            listing_token: cli
                .listing_token
                .unwrap_or_else(|| cli.campaign_token.clone()),
            campaign_token: cli.campaign_token,
            action: cli.action,
            explicit_start: cli.start_date,
            sink,
            workers: cli.workers,
            db_connections: cli.db_connections,
            filters,
            api_base: cli.api_base.trim_end_matches('/').to_owned(),
            state_dir: cli.state_dir.unwrap_or_else(default_state_dir),
        })
    }

    /// Effective start date: the explicit flag, else the persisted resume
    /// point, else the per-mode default. Init mode has no start date.
    pub fn resolve_start_date(&self, persisted: Option<String>) -> Option<DateTime<Utc>> {
        if self.action == Action::DbInit {
            return None;
        }
        if let Some(explicit) = self.explicit_start {
            return Some(explicit.and_utc());
        }
        if let Some(resumed) =
            persisted.and_then(|ts| NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).ok())
        {
            return Some(resumed.and_utc());
        }
        match self.action {
            Action::DbUpdate => Some(Utc::now() - Delta::weeks(1)),
            _ => Some(Utc::now()),
        }
    }
}

fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".activity-sync")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["activity-sync-worker"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    fn base_args(action: &'static str, url: &'static str) -> Vec<&'static str> {
        vec!["-c", "camp1", "--ct", "tok1", "-a", action, "--url", url]
    }

    #[test]
    fn database_url_schemes_map_to_backends() {
        for (url, backend) in [
            ("mysql://u:p@localhost:3306/db", DbBackend::MySql),
            ("postgres://u:p@localhost:5432/db", DbBackend::Postgres),
            ("sqlserver://u:p@localhost:1433/db", DbBackend::SqlServer),
        ] {
            match SinkTarget::parse(Action::DbSync, url).unwrap() {
                SinkTarget::Database(target) => assert_eq!(target.backend, backend),
                SinkTarget::Webhook(_) => panic!("expected database target"),
            }
        }
    }

    #[test]
    fn mismatched_action_and_scheme_is_rejected() {
        assert!(SinkTarget::parse(Action::Webhook, "mysql://u:p@h/db").is_err());
        assert!(SinkTarget::parse(Action::DbSync, "https://example.com/hook").is_err());
        assert!(SinkTarget::parse(Action::DbSync, "not a url").is_err());
    }

    #[test]
    fn filter_modes_become_query_filters() {
        let mut args = base_args("db_sync", "mysql://u:p@h:3306/db");
        args.extend_from_slice(&["--fm", "hi_updates_only", "--fp", "fc_,qc_"]);
        let config = Config::from_cli(cli(&args)).unwrap();
        assert_eq!(config.filters.event_type.as_deref(), Some("update"));
        assert!(config.filters.hi_only);
        assert_eq!(config.filters.task_prefixes.as_deref(), Some("fc_,qc_"));

        let mut args = base_args("db_sync", "mysql://u:p@h:3306/db");
        args.extend_from_slice(&["--fm", "updates_only"]);
        let config = Config::from_cli(cli(&args)).unwrap();
        assert_eq!(config.filters.event_type.as_deref(), Some("update"));
        assert!(!config.filters.hi_only);
    }

    #[test]
    fn start_date_prefers_flag_then_resume_point() {
        let mut args = base_args("db_sync", "mysql://u:p@h:3306/db");
        args.extend_from_slice(&["-s", "2024-01-01T00:00:00"]);
        let config = Config::from_cli(cli(&args)).unwrap();
        let resolved = config
            .resolve_start_date(Some("2024-05-01T12:00:00".to_owned()))
            .unwrap();
        assert_eq!(resolved.to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let config =
            Config::from_cli(cli(&base_args("db_sync", "mysql://u:p@h:3306/db"))).unwrap();
        let resolved = config
            .resolve_start_date(Some("2024-05-01T12:00:00".to_owned()))
            .unwrap();
        assert_eq!(resolved.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn init_mode_has_no_start_date() {
        let config =
            Config::from_cli(cli(&base_args("db_init", "mysql://u:p@h:3306/db"))).unwrap();
        assert!(config.resolve_start_date(None).is_none());
    }

    #[test]
    fn update_mode_defaults_a_week_back() {
        let config =
            Config::from_cli(cli(&base_args("db_update", "mysql://u:p@h:3306/db"))).unwrap();
        let resolved = config.resolve_start_date(None).unwrap();
        let age = Utc::now() - resolved;
        assert!(age >= Delta::days(6) && age <= Delta::days(8));
    }

    #[test]
    fn listing_token_falls_back_to_campaign_token() {
        let config =
            Config::from_cli(cli(&base_args("db_init", "mysql://u:p@h:3306/db"))).unwrap();
        assert_eq!(config.listing_token, "tok1");
    }
}
