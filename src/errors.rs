use colored::*;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    // Configuration errors
    #[error("{0} is not set")]
    MissingSetting(&'static str),

    #[error("{key} has an invalid value '{value}': {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    #[error("Failed to read .env: {0}")]
    DotEnv(#[from] dotenvy::Error),

    // Zendesk errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Zendesk API error ({status}) for {url}: {body}")]
    ApiStatus { status: u16, url: String, body: String },

    #[error("Unexpected Zendesk response: {0}")]
    UnexpectedResponse(String),

    #[error("Failed to delete ticket {ticket_id} ({status}): {body}")]
    DeleteFailed {
        ticket_id: u64,
        status: u16,
        body: String,
    },

    // Filesystem errors
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build archive {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to serialize ticket {ticket_id}: {source}")]
    Serialize {
        ticket_id: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Broad classes of failure, each mapped to one recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TransientNetwork,
    PersistentApi,
    Filesystem,
}

/// What the archival loop does when an error of a given kind surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Record the failure, leave the ticket alone, continue with the next one.
    SkipTicket,
    /// Stop the current pass; the scheduler rests and starts a new one.
    AbortPass,
    /// Stop the process.
    Shutdown,
}

impl ErrorKind {
    pub fn recovery(self) -> Recovery {
        match self {
            ErrorKind::Configuration => Recovery::Shutdown,
            ErrorKind::TransientNetwork => Recovery::AbortPass,
            ErrorKind::PersistentApi => Recovery::SkipTicket,
            ErrorKind::Filesystem => Recovery::Shutdown,
        }
    }

    fn hint(self) -> &'static str {
        match self {
            ErrorKind::Configuration => {
                "Set ZENDESK_SUBDOMAIN, ZENDESK_EMAIL and ZENDESK_API_TOKEN (a .env file works too)"
            }
            ErrorKind::TransientNetwork => "Check your connection to Zendesk and try again",
            ErrorKind::PersistentApi => "Check the API token permissions and the ticket id",
            ErrorKind::Filesystem => "Check DOWNLOAD_DIR permissions and free disk space",
        }
    }
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::MissingSetting(_)
            | ArchiveError::InvalidSetting { .. }
            | ArchiveError::ConfigSource(_)
            | ArchiveError::DotEnv(_) => ErrorKind::Configuration,
            ArchiveError::Network(_) => ErrorKind::TransientNetwork,
            ArchiveError::ApiStatus { status, .. } => classify_status(*status),
            ArchiveError::UnexpectedResponse(_) | ArchiveError::DeleteFailed { .. } => {
                ErrorKind::PersistentApi
            }
            ArchiveError::Io { .. } | ArchiveError::Zip { .. } | ArchiveError::Serialize { .. } => {
                ErrorKind::Filesystem
            }
        }
    }

    pub fn recovery(&self) -> Recovery {
        self.kind().recovery()
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }

    /// Multi-line, colored rendering for the terminal.
    pub fn render(&self) -> String {
        let title = match self.kind() {
            ErrorKind::Configuration => "Configuration error",
            ErrorKind::TransientNetwork => "Network error",
            ErrorKind::PersistentApi => "Zendesk API error",
            ErrorKind::Filesystem => "Filesystem error",
        };
        format!(
            "{}\n   {}\n\n   {}",
            title.red().bold(),
            self.to_string().dimmed(),
            self.kind().hint()
        )
    }
}

/// 429 and 5xx are transient, every other failing status is not.
fn classify_status(status: u16) -> ErrorKind {
    if status == 429 || (500..600).contains(&status) {
        ErrorKind::TransientNetwork
    } else {
        ErrorKind::PersistentApi
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ArchiveError::UnexpectedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ArchiveError::ApiStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                body: err.to_string(),
            }
        } else {
            ArchiveError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_status(status: u16) -> ArchiveError {
        ArchiveError::ApiStatus {
            status,
            url: "https://acme.zendesk.com/api/v2/users/1".to_string(),
            body: String::new(),
        }
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(ErrorKind::Configuration.recovery(), Recovery::Shutdown);
        assert_eq!(ErrorKind::TransientNetwork.recovery(), Recovery::AbortPass);
        assert_eq!(ErrorKind::PersistentApi.recovery(), Recovery::SkipTicket);
        assert_eq!(ErrorKind::Filesystem.recovery(), Recovery::Shutdown);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(api_status(500).kind(), ErrorKind::TransientNetwork);
        assert_eq!(api_status(503).kind(), ErrorKind::TransientNetwork);
        assert_eq!(api_status(429).kind(), ErrorKind::TransientNetwork);
        assert_eq!(api_status(404).kind(), ErrorKind::PersistentApi);
        assert_eq!(api_status(401).kind(), ErrorKind::PersistentApi);
    }

    #[test]
    fn test_missing_setting_message() {
        let err = ArchiveError::MissingSetting("ZENDESK_EMAIL");
        assert_eq!(err.to_string(), "ZENDESK_EMAIL is not set");
        assert_eq!(err.recovery(), Recovery::Shutdown);
    }

    #[test]
    fn test_filesystem_errors_shut_down() {
        let err = ArchiveError::io(
            "/data/1",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::Filesystem);
        assert!(err.to_string().contains("/data/1"));
    }

    #[test]
    fn test_delete_failure_is_skippable() {
        let err = ArchiveError::DeleteFailed {
            ticket_id: 9,
            status: 422,
            body: "{}".to_string(),
        };
        assert_eq!(err.recovery(), Recovery::SkipTicket);
    }
}
