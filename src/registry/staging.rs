//! Staged extraction with promotion into the destination directory.
//!
//! Layers are unpacked into a hidden directory created inside the
//! destination. Only once every layer has been extracted are the staged
//! entries moved into place, so a failed run leaves the destination as it
//! found it. Staging on the same filesystem keeps promotion a series of
//! renames rather than copies.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of the hidden staging directory.
const STAGING_PREFIX: &str = ".modpull-staging-";

/// Prefix of the hidden directory holding files replaced during promotion.
const BACKUP_PREFIX: &str = ".modpull-backup-";

/// A scratch directory inside the destination that receives extracted layers.
///
/// Dropping the area without calling [`StagingArea::promote`] removes it and
/// everything extracted so far.
///
/// # Examples
///
/// ```
/// use modpull::registry::staging::StagingArea;
///
/// let dest = tempfile::tempdir().expect("temp dir");
/// let staging = StagingArea::create(dest.path()).expect("staging area");
/// std::fs::write(staging.path().join("values.cue"), "values: {}").expect("write");
///
/// let entries = staging.promote().expect("promote");
/// assert_eq!(entries, vec!["values.cue".to_owned()]);
/// assert!(dest.path().join("values.cue").exists());
/// ```
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    destination: PathBuf,
}

impl StagingArea {
    /// Create a staging directory inside `destination`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while creating the directory.
    pub fn create(destination: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(destination)?;
        log::trace!("staging extraction in {}", dir.path().display());
        Ok(Self {
            dir,
            destination: destination.to_path_buf(),
        })
    }

    /// Return the directory layers should be extracted into.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Move every staged entry into the destination and remove the staging
    /// directory.
    ///
    /// Existing destination files with the same relative path are replaced;
    /// existing directories are merged. The whole staged tree is checked for
    /// kind conflicts before anything moves, and replaced files are kept in a
    /// hidden backup directory until promotion completes. If a move fails
    /// part-way, every completed move is undone and the backups restored.
    /// Returns the sorted names of the top-level entries that were promoted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an entry cannot be moved, including when a
    /// staged file would replace a destination directory or vice versa.
    pub fn promote(self) -> io::Result<Vec<String>> {
        check_conflicts(self.dir.path(), &self.destination)?;
        let backup = tempfile::Builder::new()
            .prefix(BACKUP_PREFIX)
            .tempdir_in(&self.destination)?;
        let names = sorted_names(self.dir.path())?;

        let mut journal = Journal::new(backup.path());
        let moved = names.iter().try_for_each(|name| {
            journal.move_entry(&self.dir.path().join(name), &self.destination.join(name))
        });
        if let Err(err) = moved {
            log::debug!("promotion into {} failed: {err}", self.destination.display());
            journal.roll_back();
            return Err(err);
        }

        backup.close()?;
        self.dir.close()?;
        Ok(names
            .into_iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

fn sorted_names(dir: &Path) -> io::Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|item| item.map(|entry| entry.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

fn kind_conflict(target: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "cannot replace {} with an entry of a different kind",
            target.display()
        ),
    )
}

/// Fail if any staged entry would replace a destination entry of another
/// kind, without touching either tree.
fn check_conflicts(source: &Path, target: &Path) -> io::Result<()> {
    for name in sorted_names(source)? {
        let staged = source.join(&name);
        let existing = target.join(&name);
        let existing_is_dir = match fs::symlink_metadata(&existing) {
            Ok(meta) => meta.is_dir(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let staged_is_dir = fs::symlink_metadata(&staged)?.is_dir();
        if existing_is_dir != staged_is_dir {
            return Err(kind_conflict(&existing));
        }
        if staged_is_dir {
            check_conflicts(&staged, &existing)?;
        }
    }
    Ok(())
}

/// One completed move, recorded so it can be undone.
#[derive(Debug)]
enum Step {
    Created {
        source: PathBuf,
        target: PathBuf,
    },
    Replaced {
        source: PathBuf,
        target: PathBuf,
        backup: PathBuf,
    },
}

/// Ordered record of the moves made during one promotion.
#[derive(Debug)]
struct Journal<'a> {
    backup_dir: &'a Path,
    steps: Vec<Step>,
}

impl<'a> Journal<'a> {
    const fn new(backup_dir: &'a Path) -> Self {
        Self {
            backup_dir,
            steps: Vec::new(),
        }
    }

    fn move_entry(&mut self, source: &Path, target: &Path) -> io::Result<()> {
        let source_is_dir = fs::symlink_metadata(source)?.is_dir();
        match fs::symlink_metadata(target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::rename(source, target)?;
                self.steps.push(Step::Created {
                    source: source.to_path_buf(),
                    target: target.to_path_buf(),
                });
                Ok(())
            }
            Err(e) => Err(e),
            Ok(existing) if existing.is_dir() && source_is_dir => {
                for name in sorted_names(source)? {
                    self.move_entry(&source.join(&name), &target.join(&name))?;
                }
                Ok(())
            }
            Ok(existing) if !existing.is_dir() && !source_is_dir => {
                let backup = self.backup_dir.join(self.steps.len().to_string());
                fs::rename(target, &backup)?;
                self.steps.push(Step::Replaced {
                    source: source.to_path_buf(),
                    target: target.to_path_buf(),
                    backup,
                });
                fs::rename(source, target)
            }
            Ok(_) => Err(kind_conflict(target)),
        }
    }

    /// Undo every recorded move, newest first.
    ///
    /// Staged entries go back into the staging directory and replaced files
    /// are restored from the backup directory. Failures are logged and the
    /// remaining steps still run.
    fn roll_back(self) {
        for step in self.steps.into_iter().rev() {
            let undone = match &step {
                Step::Created { source, target } => fs::rename(target, source),
                Step::Replaced {
                    source,
                    target,
                    backup,
                } => restore_replaced(source, target, backup),
            };
            if let Err(err) = undone {
                log::warn!("could not roll back {step:?}: {err}");
            }
        }
    }
}

fn restore_replaced(source: &Path, target: &Path, backup: &Path) -> io::Result<()> {
    match fs::rename(target, source) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(backup, target)
}
