use crate::api::ZendeskClient;
use crate::errors::{ArchiveError, Result};
use crate::models::Ticket;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes `<id>-ticket.json` and one zip per attachment into the ticket
/// directory, returning every file written. Existing files are overwritten.
///
/// Attachments are processed in order; if one fails, the files already
/// written for earlier attachments stay on disk.
pub async fn save(client: &ZendeskClient, ticket: &Ticket) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(ticket.attachment_urls.len() + 1);

    let json_path = ticket.json_path();
    let json = serde_json::to_vec_pretty(ticket).map_err(|source| ArchiveError::Serialize {
        ticket_id: ticket.id,
        source,
    })?;
    fs::write(&json_path, json).map_err(|e| ArchiveError::io(&json_path, e))?;
    written.push(json_path);

    let mut used_names = HashSet::new();
    for (index, url) in ticket.attachment_urls.iter().enumerate() {
        let filename = unique_name(&mut used_names, attachment_filename(url, index), index);
        let bytes = client.download_attachment(url).await?;
        let zip_path = store_compressed(&ticket.ticket_directory_path, &filename, &bytes)?;
        tracing::debug!(ticket_id = ticket.id, file = %zip_path.display(), "Attachment stored");
        written.push(zip_path);
    }

    Ok(written)
}

/// Local file name for an attachment, built from the last non-empty path
/// segment (Zendesk puts a per-attachment token there) and the `name` query
/// parameter: `<segment>-<name>` when both exist, otherwise whichever does.
/// Never contains a path separator and never resolves to `.` or `..`.
pub fn attachment_filename(url: &str, index: usize) -> String {
    let (segment, name) = match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let name = parsed
                .query_pairs()
                .find(|(key, _)| key == "name")
                .map(|(_, value)| value.into_owned());
            let segment = parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(|segment| {
                    urlencoding::decode(segment)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| segment.to_string())
                });
            (segment, name)
        }
        Err(_) => (url.rsplit('/').next().map(str::to_string), None),
    };

    let segment = segment.as_deref().and_then(safe_component);
    let name = name.as_deref().and_then(safe_component);

    match (segment, name) {
        (Some(segment), Some(name)) if segment != name => format!("{}-{}", segment, name),
        (Some(segment), _) => segment.to_string(),
        (None, Some(name)) => name.to_string(),
        (None, None) => format!("attachment-{}", index + 1),
    }
}

fn safe_component(name: &str) -> Option<&str> {
    name.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

/// Two attachments of one ticket never share a file name: a repeated name
/// gets the attachment's position as a prefix.
fn unique_name(used: &mut HashSet<String>, filename: String, index: usize) -> String {
    if used.insert(filename.clone()) {
        return filename;
    }

    let mut prefix = index + 1;
    loop {
        let candidate = format!("{}-{}", prefix, filename);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        prefix += 1;
    }
}

/// Wraps `bytes` in `<dir>/<filename>.zip` as a single entry named
/// `filename`. The raw bytes only ever live in a temporary file inside `dir`,
/// removed once the archive is complete.
fn store_compressed(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    let zip_path = dir.join(format!("{}.zip", filename));
    let zip_err = |source: zip::result::ZipError| ArchiveError::Zip {
        path: zip_path.clone(),
        source,
    };

    let mut raw = NamedTempFile::new_in(dir).map_err(|e| ArchiveError::io(dir, e))?;
    let raw_path = raw.path().to_path_buf();
    raw.write_all(bytes)
        .and_then(|_| raw.seek(SeekFrom::Start(0)))
        .map_err(|e| ArchiveError::io(&raw_path, e))?;

    let zip_file = File::create(&zip_path).map_err(|e| ArchiveError::io(&zip_path, e))?;
    let mut zip = ZipWriter::new(zip_file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    zip.start_file(filename, options).map_err(zip_err)?;
    std::io::copy(&mut raw, &mut zip).map_err(|e| ArchiveError::io(&zip_path, e))?;
    zip.finish().map_err(zip_err)?;

    raw.close().map_err(|e| ArchiveError::io(&raw_path, e))?;
    Ok(zip_path)
}
