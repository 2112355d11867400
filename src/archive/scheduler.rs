use super::driver::{run_pass, PassOptions};
use crate::api::ZendeskClient;
use crate::config::Settings;
use crate::errors::{Recovery, Result};
use chrono::Utc;

/// Runs archival passes back to back, resting between them.
///
/// With `max_passes` unset this only returns on an error whose recovery is
/// [`Recovery::Shutdown`]. Passes aborted for any other reason are logged and
/// the next pass starts after the usual rest.
pub async fn run(
    client: &ZendeskClient,
    settings: &Settings,
    options: PassOptions,
    max_passes: Option<u64>,
) -> Result<()> {
    settings.ensure_download_dir()?;

    let mut completed: u64 = 0;
    loop {
        if max_passes.is_some_and(|max| completed >= max) {
            return Ok(());
        }

        if completed > 0 {
            tracing::debug!("Resting....");
            tokio::time::sleep(settings.resting_time).await;
        }

        let cutoff = settings.retention_cutoff(Utc::now());

        match run_pass(client, settings, options, cutoff).await {
            Ok(report) => {
                tracing::debug!(
                    archived = report.archived.len(),
                    deleted = report.deleted.len(),
                    skipped = report.skipped.len(),
                    not_eligible = report.not_eligible.len(),
                    "Pass complete"
                );
            }
            Err(err) if err.recovery() == Recovery::Shutdown => return Err(err),
            Err(err) => {
                tracing::error!(error = %err, "Archival pass aborted");
            }
        }

        completed += 1;
    }
}
