use super::writer;
use crate::api::ZendeskClient;
use crate::config::Settings;
use crate::errors::{Recovery, Result};
use crate::models::{SearchResult, Ticket};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassOptions {
    /// Delete each ticket from Zendesk once its archive is on disk.
    pub delete_archived: bool,
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub archived: Vec<u64>,
    pub deleted: Vec<u64>,
    pub skipped: Vec<SkippedTicket>,
    /// Search hits whose `updated_at` is not before the cutoff.
    pub not_eligible: Vec<u64>,
}

#[derive(Debug)]
pub struct SkippedTicket {
    pub id: Option<u64>,
    pub reason: String,
}

/// One search-and-archive pass over every ticket currently eligible.
///
/// Errors that only concern a single ticket are recorded in the report and
/// the pass moves on; anything else ends the pass and is returned.
pub async fn run_pass(
    client: &ZendeskClient,
    settings: &Settings,
    options: PassOptions,
    cutoff: DateTime<Utc>,
) -> Result<PassReport> {
    let records = client.search_closed_tickets_older_than(cutoff).await?;
    tracing::debug!(results = records.len(), %cutoff, "Search complete");

    let mut report = PassReport::default();

    for record in records {
        let id = record["id"].as_u64();

        if let Err(err) = archive_record(client, settings, options, cutoff, record, &mut report).await
        {
            if err.recovery() != Recovery::SkipTicket {
                return Err(err);
            }
            tracing::warn!(ticket_id = ?id, error = %err, "Ticket skipped");
            report.skipped.push(SkippedTicket {
                id,
                reason: err.to_string(),
            });
        }
    }

    Ok(report)
}

async fn archive_record(
    client: &ZendeskClient,
    settings: &Settings,
    options: PassOptions,
    cutoff: DateTime<Utc>,
    record: Value,
    report: &mut PassReport,
) -> Result<()> {
    let result = SearchResult::from_record(record)?;

    // The search already filters on updated<, every row is still checked.
    if !result.is_older_than(cutoff) {
        tracing::debug!(ticket_id = result.id, updated_at = %result.updated_at, "Not old enough");
        report.not_eligible.push(result.id);
        return Ok(());
    }

    let ticket = Ticket::build(client, &result, &settings.download_dir).await?;
    writer::save(client, &ticket).await?;
    report.archived.push(ticket.id);
    tracing::info!("Ticket {} archived", ticket.id);

    if options.delete_archived {
        client.delete_ticket(ticket.id).await?;
        report.deleted.push(ticket.id);
    }

    Ok(())
}
