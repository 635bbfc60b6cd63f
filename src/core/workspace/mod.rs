#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::meltsfile::MELTSFILE_EXTENSION;
use crate::core::types::ErrorCategory;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENVIRONMENT_FILE: &str = "environment.txt";

/// Directory holding one job's input files and, after a run, the tool's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    root: PathBuf,
    input_file: String,
}

impl JobWorkspace {
    /// Create `indir/name/` (idempotently) and write `<title>.melts` and
    /// `environment.txt` with exactly the supplied text.
    pub fn create(
        name: &str,
        title: &str,
        input_text: &str,
        indir: &Path,
        environment_text: &str,
    ) -> Result<Self, AppError> {
        Self::create_with_extension(
            name,
            title,
            input_text,
            indir,
            environment_text,
            MELTSFILE_EXTENSION,
        )
    }

    pub fn create_with_extension(
        name: &str,
        title: &str,
        input_text: &str,
        indir: &Path,
        environment_text: &str,
        extension: &str,
    ) -> Result<Self, AppError> {
        if input_text.trim().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("input text for job {} is empty", name),
            ));
        }
        let title = if title.is_empty() { name } else { title };

        let root = indir.join(name);
        fs::create_dir_all(&root).map_err(|err| {
            AppError::new(
                ErrorCategory::WorkspaceError,
                format!("failed to create job directory {}: {}", root.display(), err),
            )
        })?;

        let input_file = format!("{}.{}", title, extension);
        atomic_write(&root.join(&input_file), input_text.as_bytes())?;
        atomic_write(&root.join(ENVIRONMENT_FILE), environment_text.as_bytes())?;

        Ok(Self { root, input_file })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Input file name, relative to [`JobWorkspace::root`].
    pub fn input_file(&self) -> &str {
        &self.input_file
    }

    pub fn environment_file(&self) -> &str {
        ENVIRONMENT_FILE
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data).map_err(|err| {
        AppError::new(
            ErrorCategory::WorkspaceError,
            format!("failed to write {}: {}", tmp_path.display(), err),
        )
    })?;
    fs::rename(&tmp_path, path).map_err(|err| {
        AppError::new(
            ErrorCategory::WorkspaceError,
            format!(
                "failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                err
            ),
        )
    })
}
