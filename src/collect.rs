//! Resolving glob patterns into concrete source files.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::CollectError;

/// A file-matching rule together with the base directory that output paths
/// are computed against. For `src/images/**/*.png` with base `src/images`,
/// the file `src/images/a/b.png` lands at `a/b.png` in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: String,
    base: Utf8PathBuf,
    required: bool,
}

impl GlobPattern {
    /// Creates a pattern whose base is its static prefix, the part before the
    /// first wildcard. A pattern without wildcards uses its parent directory.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let base = static_prefix(&pattern);

        Self {
            pattern,
            base,
            required: false,
        }
    }

    /// Overrides the base directory.
    pub fn base(mut self, base: impl Into<Utf8PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    /// Makes an empty match an error instead of a no-op.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn base_dir(&self) -> &Utf8Path {
        &self.base
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// A single matched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path usable for reading, already resolved against the project root.
    pub path: Utf8PathBuf,
    /// Path relative to the pattern base, used to mirror the file into the
    /// destination.
    pub relative: Utf8PathBuf,
}

/// Which matched files make it into the collected set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    /// Only files whose mirrored counterpart under this directory is missing
    /// or older than the source.
    NewerThan(Utf8PathBuf),
}

/// Resolve `pattern` under `root` into an ordered list of files.
pub fn collect(
    root: &Utf8Path,
    pattern: &GlobPattern,
    filter: &Filter,
) -> Result<Vec<SourceFile>, CollectError> {
    let full = resolve(root, &pattern.pattern);
    let base = resolve(root, &pattern.base);

    let paths = glob::glob(full.as_str())
        .map_err(|e| CollectError::Pattern(full.to_string(), e))?;

    let mut files = Vec::new();
    for path in paths {
        let path = Utf8PathBuf::try_from(path?)?;

        if !path.is_file() {
            continue;
        }

        let relative = match path.strip_prefix(&base) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => path.file_name().map(Utf8PathBuf::from).unwrap_or_default(),
        };

        files.push(SourceFile { path, relative });
    }

    if files.is_empty() && pattern.required {
        return Err(CollectError::NoMatches(pattern.pattern.clone()));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));

    match filter {
        Filter::All => Ok(files),
        Filter::NewerThan(dest) => {
            let mut fresh = Vec::with_capacity(files.len());
            for file in files {
                if is_newer(&file.path, &dest.join(&file.relative))? {
                    fresh.push(file);
                }
            }
            Ok(fresh)
        }
    }
}

/// Compare modification times; a missing destination always loses.
pub fn is_newer(source: &Utf8Path, dest: &Utf8Path) -> Result<bool, CollectError> {
    let modified_dst = match fs::metadata(dest).and_then(|meta| meta.modified()) {
        Ok(time) => time,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(source) => {
            return Err(CollectError::Io {
                path: dest.to_path_buf(),
                source,
            });
        }
    };

    let modified_src = fs::metadata(source)
        .and_then(|meta| meta.modified())
        .map_err(|e| CollectError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;

    Ok(modified_src > modified_dst)
}

/// Join `path` onto `root`, leaving it alone when the root is the current
/// directory so matched paths do not grow a `./` prefix.
pub fn resolve(root: &Utf8Path, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
    let path = path.as_ref();
    if root.as_str().is_empty() || root == "." || path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Everything before the first component containing a wildcard.
pub(crate) fn static_prefix(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len().saturating_sub(1));

    components.iter().take(split).collect()
}
