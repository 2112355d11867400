use crate::api::ZendeskClient;
use crate::errors::{ArchiveError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One row of the search response, with the fields the archiver relies on
/// pulled out next to the untouched raw record.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: u64,
    pub requester_id: u64,
    pub updated_at: DateTime<FixedOffset>,
    pub record: Value,
}

impl SearchResult {
    pub fn from_record(record: Value) -> Result<Self> {
        let id = record["id"]
            .as_u64()
            .ok_or_else(|| ArchiveError::UnexpectedResponse("search result without id".to_string()))?;

        let requester_id = record["requester_id"].as_u64().ok_or_else(|| {
            ArchiveError::UnexpectedResponse(format!("ticket {} has no requester_id", id))
        })?;

        let raw_updated_at = record["updated_at"].as_str().ok_or_else(|| {
            ArchiveError::UnexpectedResponse(format!("ticket {} has no updated_at", id))
        })?;
        let updated_at = parse_updated_at(raw_updated_at)?;

        Ok(Self {
            id,
            requester_id,
            updated_at,
            record,
        })
    }

    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at.with_timezone(&Utc) < cutoff
    }

    /// Copy of the raw record with `updated_at` in ISO-8601 form.
    pub fn rendered_record(&self) -> Value {
        let mut record = self.record.clone();
        if let Some(fields) = record.as_object_mut() {
            fields.insert(
                "updated_at".to_string(),
                Value::String(self.updated_at.to_rfc3339()),
            );
        }
        record
    }
}

/// Accepts RFC 3339 (`2020-01-01T00:00:00Z`) as well as a compact offset
/// (`2020-01-01T00:00:00+0000`).
pub fn parse_updated_at(raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .map_err(|e| ArchiveError::UnexpectedResponse(format!("bad updated_at '{}': {}", raw, e)))
}

/// A ticket snapshot ready to be written to disk.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: u64,
    pub requester_id: u64,
    pub requester_email: String,
    pub ticket_record: Value,
    pub comments_record: Value,
    pub attachment_urls: Vec<String>,
    pub ticket_directory_path: PathBuf,
}

impl Ticket {
    /// Fetches everything the archive needs for one search result. Any failure
    /// leaves no `Ticket` behind, so nothing half-built is ever saved.
    pub async fn build(
        client: &ZendeskClient,
        result: &SearchResult,
        download_dir: &Path,
    ) -> Result<Self> {
        let requester_email = client.get_user_email(result.requester_id).await?;

        let ticket_directory_path = download_dir.join(result.id.to_string());
        std::fs::create_dir_all(&ticket_directory_path)
            .map_err(|e| ArchiveError::io(&ticket_directory_path, e))?;

        let comments_record = client.get_ticket_comments(result.id).await?;
        let attachment_urls = attachment_urls(&comments_record)?;

        Ok(Self {
            id: result.id,
            requester_id: result.requester_id,
            requester_email,
            ticket_record: result.rendered_record(),
            comments_record,
            attachment_urls,
            ticket_directory_path,
        })
    }

    pub fn json_path(&self) -> PathBuf {
        self.ticket_directory_path
            .join(format!("{}-ticket.json", self.id))
    }
}

/// Content URLs of every attachment, in comment order. Duplicates are kept.
pub fn attachment_urls(comments_record: &Value) -> Result<Vec<String>> {
    let comments = comments_record["comments"].as_array().ok_or_else(|| {
        ArchiveError::UnexpectedResponse("comments response without comments".to_string())
    })?;

    let mut urls = Vec::new();
    for comment in comments {
        let Some(attachments) = comment["attachments"].as_array() else {
            continue;
        };
        for attachment in attachments {
            let url = attachment["content_url"].as_str().ok_or_else(|| {
                ArchiveError::UnexpectedResponse("attachment without content_url".to_string())
            })?;
            urls.push(url.to_string());
        }
    }

    Ok(urls)
}
