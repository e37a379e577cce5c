//! Discovery of the most recently created model file

use crate::error::{ExplainError, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// A model file found in the model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidate {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Looks up model files by glob pattern in a single directory
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
    pattern: String,
    matcher: GlobMatcher,
}

impl ModelRegistry {
    /// Create a registry for `dir`, matching file names against the shell glob `pattern`
    ///
    /// `*`, `?`, `[...]` classes and `{a,b}` alternatives are supported.
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self {
            dir: dir.into(),
            pattern,
            matcher,
        })
    }

    /// All matching files directly inside the directory
    ///
    /// Symlinks are resolved, so a link to a model file counts with the target's timestamps.
    pub fn candidates(&self) -> Result<Vec<ModelCandidate>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                    // Dangling symlink
                    debug!(path = ?e.path(), "Skipping unreadable entry");
                    continue;
                }
                Err(e) => return Err(ExplainError::IoError(e.into())),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if !self.matcher.is_match(entry.file_name()) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| ExplainError::IoError(e.into()))?;
            // Not every filesystem records a birth time
            let created = metadata.created().or_else(|_| metadata.modified())?;
            debug!(path = %entry.path().display(), "Model candidate");
            found.push(ModelCandidate {
                path: entry.into_path(),
                created,
            });
        }
        Ok(found)
    }

    /// Path of the newest matching model
    pub fn newest(&self) -> Result<PathBuf> {
        let candidates = self.candidates()?;
        let path = select_newest(&candidates).ok_or_else(|| ExplainError::ModelNotFound {
            dir: self.dir.clone(),
            pattern: self.pattern.clone(),
        })?;
        info!(
            path = %path.display(),
            candidates = candidates.len(),
            "Selected newest model"
        );
        Ok(path)
    }
}

/// Newest candidate by creation time; equal times fall back to the larger file name
pub fn select_newest(candidates: &[ModelCandidate]) -> Option<PathBuf> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
        })
        .map(|c| c.path.clone())
}

/// Convenience wrapper: newest model in `dir` matching `pattern`
pub fn find_newest_model(dir: &Path, pattern: &str) -> Result<PathBuf> {
    ModelRegistry::new(dir, pattern)?.newest()
}
