//! Back-links from event-list notes to their detail notes.
//!
//! After a detail note is written, the originating note is patched so the
//! matched marker is followed by ` [[path|详情]]`. The source is re-read
//! at write time; if the marker is gone the patch is refused.

use std::path::PathBuf;

use crate::extract::{ExtractedEvent, Locus};

/// Label shown on detail links.
pub const DETAIL_LINK_LABEL: &str = "详情";

/// Why a back-link could not be written.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The matched text is no longer where extraction found it.
    #[error("Original text '{matched}' no longer present in {path}")]
    SourceChanged { path: PathBuf, matched: String },
}

/// The annotation inserted after a marker, including its leading space.
pub fn link_annotation(link_path: &str) -> String {
    format!(" [[{link_path}|{DETAIL_LINK_LABEL}]]")
}

/// Inserts the annotation after the located text.
///
/// Span loci must still hold the matched text at the same byte range.
/// First-occurrence loci match a whole line, ignoring trailing whitespace,
/// so a longer line that merely starts with the same text is never patched.
/// Returns `None` when the text cannot be found.
pub fn insert_link(text: &str, locus: &Locus, link_path: &str) -> Option<String> {
    let insert_at = match locus {
        Locus::Span {
            start,
            end,
            matched,
        } => {
            if text.get(*start..*end) != Some(matched.as_str()) {
                return None;
            }
            *end
        }
        Locus::FirstOccurrence { matched } => line_end_of(text, matched)?,
    };

    let annotation = link_annotation(link_path);
    let mut out = String::with_capacity(text.len() + annotation.len());
    out.push_str(&text[..insert_at]);
    out.push_str(&annotation);
    out.push_str(&text[insert_at..]);
    Some(out)
}

/// Byte offset just past the first line whose content is exactly `matched`.
fn line_end_of(text: &str, matched: &str) -> Option<usize> {
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == matched {
            return Some(start + matched.len());
        }
        start += line.len();
    }
    None
}

/// Patches the event's source note with a link to `link_path`.
///
/// The whole file is rewritten. Failures are logged and returned; they
/// never abort a batch.
pub fn link_back(event: &ExtractedEvent, link_path: &str) -> Result<(), LinkError> {
    let path = &event.source_path;
    let result = std::fs::read_to_string(path)
        .map_err(|source| LinkError::Read {
            path: path.clone(),
            source,
        })
        .and_then(|text| {
            insert_link(&text, &event.locus, link_path).ok_or_else(|| LinkError::SourceChanged {
                path: path.clone(),
                matched: event.locus.matched().to_string(),
            })
        })
        .and_then(|updated| {
            std::fs::write(path, updated).map_err(|source| LinkError::Write {
                path: path.clone(),
                source,
            })
        });

    match &result {
        Ok(()) => tracing::info!("Linked {} to {link_path}", path.display()),
        Err(e) => tracing::warn!("Could not update event list: {e}"),
    }
    result
}
