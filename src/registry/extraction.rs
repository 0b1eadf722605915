//! Layer extraction for pulled module content.
//!
//! Unpacks compressed tar layers into a directory with path traversal
//! protection so a hostile layer cannot write outside the destination.

use super::manifest::LayerCompression;
use std::io::Read;
use std::path::{Component, Path};

/// Trait for extracting layer archives, enabling test mocking.
///
/// # Examples
///
/// ```
/// use modpull::registry::extraction::TarExtractor;
///
/// let extractor = TarExtractor;
/// // Use extractor.extract(layer_path, compression, dest_dir) in production
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait LayerExtractor {
    /// Extract the layer at `archive_path` into `dest_dir`.
    ///
    /// Returns the relative paths of the entries that were extracted.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape the destination directory, [`ExtractionError::EmptyArchive`]
    /// if the layer holds no entries, and [`ExtractionError::Io`] on I/O
    /// failures.
    fn extract(
        &self,
        archive_path: &Path,
        compression: LayerCompression,
        dest_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError>;
}

/// Errors arising from layer extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no entries.
    #[error("layer archive contains no files")]
    EmptyArchive,
}

/// Default extractor using the `tar`, `flate2`, and `zstd` crates.
///
/// Validates each entry path before extraction to guard against path
/// traversal attacks (zip-slip). Symbolic and hard links are skipped.
pub struct TarExtractor;

impl LayerExtractor for TarExtractor {
    fn extract(
        &self,
        archive_path: &Path,
        compression: LayerCompression,
        dest_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError> {
        let file = std::fs::File::open(archive_path)?;
        match compression {
            LayerCompression::Gzip => unpack(flate2::read::GzDecoder::new(file), dest_dir),
            LayerCompression::Zstd => unpack(zstd::Decoder::new(file)?, dest_dir),
        }
    }
}

fn unpack<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();

        validate_entry_path(&entry_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            log::debug!("skipping link entry {}", entry_path.display());
            continue;
        }

        let dest_path = dest_dir.join(&entry_path);
        if entry_type.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest_path)?;
        }

        extracted.push(entry_path.to_string_lossy().into_owned());
    }

    if extracted.is_empty() {
        return Err(ExtractionError::EmptyArchive);
    }

    Ok(extracted)
}

/// Validate that a tar entry path does not escape the destination
/// directory via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}
