//! In-flight files and the writer that lands them in the output directory.
//!
//! This module contains the [`Asset`] struct, the unit every transform step
//! consumes and produces, together with the helpers that clean, populate and
//! mirror the build output directory.

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::collect::SourceFile;
use crate::error::{CleanError, CollectError, TaskError};
use crate::utils::as_overhead;

/// The content of an [`Asset`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetData {
    /// Text content (UTF-8).
    Utf8(String),
    /// Binary content (raw bytes).
    Binary(Vec<u8>),
}

impl AsRef<[u8]> for AssetData {
    fn as_ref(&self) -> &[u8] {
        match self {
            AssetData::Utf8(s) => s.as_bytes(),
            AssetData::Binary(b) => b.as_slice(),
        }
    }
}

impl AssetData {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single file moving through a transform chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Destination path, relative to the task's output directory.
    pub path: Utf8PathBuf,
    pub data: AssetData,
    /// The source files this asset was produced from.
    pub sources: Vec<Arc<Utf8Path>>,
}

impl Asset {
    pub fn text(path: impl Into<Utf8PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: AssetData::Utf8(text.into()),
            sources: Vec::new(),
        }
    }

    pub fn binary(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: AssetData::Binary(data.into()),
            sources: Vec::new(),
        }
    }

    /// Read a collected file into memory. Files that are valid UTF-8 become
    /// text assets, anything else stays binary.
    pub fn read(file: &SourceFile) -> Result<Self, CollectError> {
        let bytes = fs::read(&file.path).map_err(|source| CollectError::Io {
            path: file.path.clone(),
            source,
        })?;

        let data = match String::from_utf8(bytes) {
            Ok(text) => AssetData::Utf8(text),
            Err(e) => AssetData::Binary(e.into_bytes()),
        };

        Ok(Self {
            path: file.relative.clone(),
            data,
            sources: vec![Arc::from(file.path.as_path())],
        })
    }

    /// The text content, if this asset holds text.
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            AssetData::Utf8(text) => Some(text),
            AssetData::Binary(_) => None,
        }
    }

    /// The source this asset is reported under in error messages.
    pub fn origin(&self) -> &Utf8Path {
        self.sources
            .first()
            .map(|path| &**path)
            .unwrap_or(self.path.as_path())
    }

    pub fn with_sources(mut self, sources: Vec<Arc<Utf8Path>>) -> Self {
        self.sources = sources;
        self
    }
}

/// Write every asset under `dir`, creating parent directories as needed.
pub fn write_assets(dir: &Utf8Path, assets: &[Asset]) -> Result<usize, TaskError> {
    for asset in assets {
        let path = dir.join(&asset.path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| TaskError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&path, &asset.data).map_err(|source| TaskError::Write { path, source })?;
    }

    Ok(assets.len())
}

/// Delete the output directory if it exists and recreate it empty.
pub fn clean_dir(dir: &Utf8Path) -> Result<(), CleanError> {
    let s = Instant::now();

    if fs::metadata(dir).is_ok() {
        fs::remove_dir_all(dir) //
            .map_err(|e| CleanError::Remove(dir.to_path_buf(), e))?;
    }

    fs::create_dir_all(dir) //
        .map_err(|e| CleanError::Create(dir.to_path_buf(), e))?;

    tracing::info!("cleaned {} {}", dir, as_overhead(s));

    Ok(())
}

/// Copy the tree under `src` into `dst`, returning the number of files.
pub fn mirror_dir(src: &Utf8Path, dst: &Utf8Path) -> std::io::Result<usize> {
    fs::create_dir_all(dst)?;

    let mut count = 0;
    for entry in src.read_dir_utf8()? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            count += mirror_dir(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            count += 1;
        }
    }

    Ok(count)
}
