use crate::errors::{ArchiveError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use ::config::{Config, Environment, Map};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_UPDATED_AT_DAYS: i64 = 365 * 3;
const DEFAULT_DOWNLOAD_DIR: &str = "./data";
const DEFAULT_RESTING_TIME_SECS: u64 = 60;

/// Raw variables as they come out of the environment. Everything stays a
/// string here so that numbers and flags are validated in one place.
#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    zendesk_subdomain: Option<String>,
    zendesk_email: Option<String>,
    zendesk_api_token: Option<String>,
    max_updated_at: Option<String>,
    download_dir: Option<String>,
    resting_time: Option<String>,
    debug: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub subdomain: String,
    pub email: String,
    pub api_token: String,
    /// Tickets last updated more than this many days ago are archived.
    pub max_updated_at_days: i64,
    pub download_dir: PathBuf,
    pub resting_time: Duration,
    pub debug: bool,
}

impl Settings {
    /// Reads `.env` (if any) and then the process environment.
    pub fn load() -> Result<Self> {
        dotenv_loaded(dotenvy::dotenv())?;
        Self::from_environment(Environment::default())
    }

    pub fn from_env_map(vars: Map<String, String>) -> Result<Self> {
        Self::from_environment(Environment::default().source(Some(vars)))
    }

    fn from_environment(environment: Environment) -> Result<Self> {
        let raw: RawEnv = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        let subdomain = required("ZENDESK_SUBDOMAIN", raw.zendesk_subdomain)?;
        let email = required("ZENDESK_EMAIL", raw.zendesk_email)?;
        let api_token = required("ZENDESK_API_TOKEN", raw.zendesk_api_token)?;

        let max_updated_at_days = match non_empty(raw.max_updated_at) {
            Some(value) => parse_days(&value)?,
            None => DEFAULT_MAX_UPDATED_AT_DAYS,
        };

        let resting_time = match non_empty(raw.resting_time) {
            Some(value) => {
                let secs = value.parse::<u64>().map_err(|e| ArchiveError::InvalidSetting {
                    key: "RESTING_TIME",
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_RESTING_TIME_SECS),
        };

        let download_dir = non_empty(raw.download_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

        Ok(Settings {
            subdomain,
            email,
            api_token,
            max_updated_at_days,
            download_dir,
            resting_time,
            debug: is_truthy(raw.debug.as_deref()),
        })
    }

    pub fn api_base_url(&self) -> String {
        format!("https://{}.zendesk.com/api/v2", self.subdomain)
    }

    /// Tickets last updated strictly before this instant are eligible.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::try_days(self.max_updated_at_days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn ensure_download_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| ArchiveError::io(&self.download_dir, e))?;
        Ok(&self.download_dir)
    }

    pub fn masked_token(&self) -> String {
        let token = &self.api_token;
        if token.len() <= 8 || !token.is_ascii() {
            return "********".to_string();
        }
        format!("{}***{}", &token[..4], &token[token.len() - 4..])
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &'static str, value: Option<String>) -> Result<String> {
    non_empty(value).ok_or(ArchiveError::MissingSetting(key))
}

fn parse_days(value: &str) -> Result<i64> {
    let invalid = |reason: String| ArchiveError::InvalidSetting {
        key: "MAX_UPDATED_AT",
        value: value.to_string(),
        reason,
    };

    let days = value.parse::<i64>().map_err(|e| invalid(e.to_string()))?;
    if days < 0 {
        return Err(invalid("must not be negative".to_string()));
    }
    if TimeDelta::try_days(days).is_none() {
        return Err(invalid("too large".to_string()));
    }
    Ok(days)
}

fn is_truthy(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !matches!(v.as_str(), "" | "0" | "false" | "no" | "off"),
    }
}

/// A missing `.env` is fine; one that exists but cannot be read or parsed is not.
fn dotenv_loaded<T>(result: std::result::Result<T, dotenvy::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
pub(crate) fn test_settings(download_dir: &Path) -> Settings {
    Settings {
        subdomain: "acme".to_string(),
        email: "agent@example.com".to_string(),
        api_token: "secret-token".to_string(),
        max_updated_at_days: DEFAULT_MAX_UPDATED_AT_DAYS,
        download_dir: download_dir.to_path_buf(),
        resting_time: Duration::ZERO,
        debug: false,
    }
}
