//! Note storage inside an Obsidian vault.
//!
//! Notes are flat Markdown files with YAML front matter. Timeline notes go
//! to the event folder, detail notes to the detail folder. File names are
//! derived from the event name and made unique by suffix probing.

pub mod link;
pub mod render;

use std::path::{Component, Path, PathBuf};

use crate::config::Config;
use crate::extract::ExtractedEvent;

pub use link::{link_back, LinkError};
pub use render::{DetailContent, DetailRecord};

/// Suffix appended to detail note names.
pub const DETAIL_SUFFIX: &str = "_详情";

/// Extension of every note written.
const NOTE_EXTENSION: &str = "md";

/// Errors raised while writing notes.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A note or directory could not be written or listed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The event folder could not be scanned.
    #[error("Invalid search pattern for {path}: {message}")]
    Pattern { path: PathBuf, message: String },

    /// Front matter could not be serialized.
    #[error("Could not write front matter for '{event}': {message}")]
    FrontMatter { event: String, message: String },
}

/// A note that was written to the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRecord {
    pub event_name: String,
    /// Year range for timeline notes, year label for detail notes.
    pub time_range_label: String,
    pub file_path: PathBuf,
    /// Path relative to the vault root with `/` separators.
    pub link_path: String,
}

/// An opened vault with its event and detail folders.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    event_dir: PathBuf,
    detail_dir: PathBuf,
}

impl Vault {
    /// Opens a vault, creating the event and detail folders if needed.
    pub fn open(root: &Path, event_folder: &str, detail_folder: &str) -> Result<Self, VaultError> {
        let vault = Self {
            root: root.to_path_buf(),
            event_dir: root.join(event_folder),
            detail_dir: root.join(detail_folder),
        };
        for dir in [&vault.event_dir, &vault.detail_dir] {
            std::fs::create_dir_all(dir).map_err(|source| VaultError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(vault)
    }

    pub fn from_config(config: &Config) -> Result<Self, VaultError> {
        Self::open(
            &config.vault_path,
            &config.event_folder,
            &config.detail_folder,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn event_dir(&self) -> &Path {
        &self.event_dir
    }

    pub fn detail_dir(&self) -> &Path {
        &self.detail_dir
    }

    /// Wiki-link target for `path`: relative to the root, `/` separated.
    ///
    /// Paths outside the vault are returned as-is; see [`Vault::resolve_inside`].
    pub fn link_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Re-expresses an existing `path` under the vault root.
    ///
    /// Returns `None` when the path does not exist or resolves outside the
    /// vault, where no relative wiki link can reach it.
    pub fn resolve_inside(&self, path: &Path) -> Option<PathBuf> {
        let root = self.root.canonicalize().ok()?;
        let path = path.canonicalize().ok()?;
        path.strip_prefix(&root)
            .ok()
            .map(|relative| self.root.join(relative))
    }

    /// Lists every Markdown note under the event folder, sorted by path.
    pub fn event_list_files(&self) -> Result<Vec<PathBuf>, VaultError> {
        let pattern = format!(
            "{}/**/*.{NOTE_EXTENSION}",
            glob::Pattern::escape(&self.event_dir.to_string_lossy())
        );
        let entries = glob::glob(&pattern).map_err(|e| VaultError::Pattern {
            path: self.event_dir.clone(),
            message: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Skipping unreadable path: {e}");
                    None
                }
            })
            .collect();
        files.sort();

        tracing::info!("Found {} event list files", files.len());
        Ok(files)
    }

    /// Writes one collected time window as a timeline note.
    ///
    /// Both the event name and the range label are cleaned for the file
    /// name; the front matter keeps the raw label.
    pub fn save_timeline(
        &self,
        event_name: &str,
        range_label: &str,
        content: &str,
    ) -> Result<NoteRecord, VaultError> {
        let base = format!(
            "{}_{}",
            safe_base_name(event_name),
            safe_base_name(range_label)
        );
        let path = unique_path(&self.event_dir, &base);
        let body = render::timeline_note(event_name, range_label, &timestamp(), content)?;

        write_note(&path, &body)?;
        Ok(NoteRecord {
            event_name: event_name.to_string(),
            time_range_label: range_label.to_string(),
            link_path: self.link_path(&path),
            file_path: path,
        })
    }

    /// Writes the detail note for an extracted event.
    ///
    /// Structured model output is projected into the detail template; any
    /// other text is embedded verbatim.
    pub fn save_detail(
        &self,
        event: &ExtractedEvent,
        content: &str,
    ) -> Result<NoteRecord, VaultError> {
        let base = format!("{}{DETAIL_SUFFIX}", safe_base_name(&event.name));
        let path = unique_path(&self.detail_dir, &base);
        let source_link = self.link_path(&event.source_path);

        let body = match DetailContent::parse(content) {
            DetailContent::Structured(record) => {
                render::detail_note(&event.name, &source_link, &record)?
            }
            DetailContent::Raw(raw) => {
                tracing::warn!(
                    "Could not parse structured details for '{}', keeping raw text",
                    event.name
                );
                render::raw_detail_note(&event.name, &source_link, &timestamp(), &raw)?
            }
        };

        write_note(&path, &body)?;
        Ok(NoteRecord {
            event_name: event.name.clone(),
            time_range_label: event.timing.label(),
            link_path: self.link_path(&path),
            file_path: path,
        })
    }
}

/// Reduces an event name to a file-system safe base name.
///
/// Keeps alphanumerics (any script), spaces, underscores and hyphens,
/// trims, then turns spaces into underscores.
pub fn safe_base_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let base = kept.trim().replace(' ', "_");
    if base.is_empty() {
        "event".to_string()
    } else {
        base
    }
}

/// First free path among `base.md`, `base_1.md`, `base_2.md`, ...
///
/// Probing is sequential and not atomic.
pub fn unique_path(dir: &Path, base: &str) -> PathBuf {
    let first = dir.join(format!("{base}.{NOTE_EXTENSION}"));
    if !first.exists() {
        return first;
    }

    let mut count = 1u32;
    loop {
        let candidate = dir.join(format!("{base}_{count}.{NOTE_EXTENSION}"));
        if !candidate.exists() {
            tracing::info!(
                "File already exists, using {}",
                candidate.file_name().unwrap_or_default().to_string_lossy()
            );
            return candidate;
        }
        count += 1;
    }
}

fn write_note(path: &Path, body: &str) -> Result<(), VaultError> {
    std::fs::write(path, body).map_err(|source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Saved note to {}", path.display());
    Ok(())
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
