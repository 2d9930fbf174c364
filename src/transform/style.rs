use std::collections::HashSet;

use camino::Utf8PathBuf;

use crate::error::TransformError;
use crate::output::Asset;
use crate::transform::{Policy, Transform};

/// Properties that still need vendor prefixes for the last two versions of
/// the major browsers.
const PREFIXES: &[(&str, &[&str])] = &[
    ("appearance", &["-webkit-", "-moz-"]),
    ("user-select", &["-webkit-", "-moz-", "-ms-"]),
    ("backdrop-filter", &["-webkit-"]),
    ("text-size-adjust", &["-webkit-", "-moz-", "-ms-"]),
    ("hyphens", &["-webkit-", "-ms-"]),
    ("mask-image", &["-webkit-"]),
    ("clip-path", &["-webkit-"]),
    ("box-decoration-break", &["-webkit-"]),
    ("tab-size", &["-moz-"]),
];

/// Compiles Sass/SCSS files to CSS using the `grass` crate.
///
/// Every asset is compiled from its source path so relative `@use` and
/// `@import` rules resolve. Partials (file names starting with `_`) are only
/// reachable through imports and are dropped from the set. Failures degrade
/// the run instead of failing it, a broken stylesheet should not end a watch
/// session.
#[derive(Debug, Clone, Default)]
pub struct CompileScss {
    load_paths: Vec<Utf8PathBuf>,
}

impl CompileScss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additional directory searched by `@use` and `@import`.
    pub fn load_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }
}

impl Transform for CompileScss {
    fn name(&self) -> &'static str {
        "compile"
    }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
        for path in &self.load_paths {
            options = options.load_path(path.as_std_path());
        }

        let mut compiled = Vec::with_capacity(assets.len());

        for asset in assets {
            if asset.path.file_name().is_some_and(|name| name.starts_with('_')) {
                continue;
            }

            let origin = asset.origin().to_path_buf();
            let css = grass::from_path(origin.as_std_path(), &options)
                .map_err(|e| TransformError::new(self.name(), e).on(origin))?;

            compiled.push(Asset::text(asset.path.with_extension("css"), css).with_sources(asset.sources));
        }

        Ok(compiled)
    }

    fn policy(&self) -> Policy {
        Policy::Degrade
    }
}

/// Adds vendor-prefixed copies of declarations listed in [`PREFIXES`].
///
/// Expects expanded stylesheet text, one declaration per line. A prefixed
/// declaration already present in the same block is never duplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prefix;

impl Transform for Prefix {
    fn name(&self) -> &'static str {
        "prefix"
    }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        for asset in &mut assets {
            let Some(css) = asset.as_text() else {
                continue;
            };

            let prefixed = prefix_css(css);
            asset.data = crate::output::AssetData::Utf8(prefixed);
        }

        Ok(assets)
    }
}

/// Re-emits stylesheets in the compressed output style.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinifyCss;

impl Transform for MinifyCss {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        let options = grass::Options::default().style(grass::OutputStyle::Compressed);

        for asset in &mut assets {
            let Some(css) = asset.as_text() else {
                continue;
            };

            let minified = grass::from_string(css.to_owned(), &options)
                .map_err(|e| TransformError::new(self.name(), e).on(asset.origin()))?;

            asset.data = crate::output::AssetData::Utf8(minified);
        }

        Ok(assets)
    }
}

fn is_boundary(line: &str) -> bool {
    let line = line.trim();
    line.ends_with('{') || line.ends_with('}') || line.starts_with('@')
}

/// Split `  color: red;` into indentation, property and the rest.
fn declaration(line: &str) -> Option<(&str, &str, &str)> {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    let (property, rest) = trimmed.split_once(':')?;

    if property.is_empty() || !property.chars().all(|c| c.is_ascii_lowercase() || c == '-') {
        return None;
    }

    Some((indent, property, rest))
}

fn prefix_css(css: &str) -> String {
    let lines: Vec<&str> = css.lines().collect();
    let mut out = String::with_capacity(css.len() + 128);
    let mut start = 0;

    while start < lines.len() {
        let end = lines[start..]
            .iter()
            .position(|line| is_boundary(line))
            .map_or(lines.len(), |offset| start + offset);

        let block = &lines[start..end];
        let present: HashSet<&str> = block
            .iter()
            .filter_map(|line| declaration(line).map(|(_, property, _)| property))
            .collect();

        for line in block {
            if let Some((indent, property, rest)) = declaration(line)
                && let Some((_, prefixes)) = PREFIXES.iter().find(|(name, _)| *name == property)
            {
                for prefix in *prefixes {
                    let prefixed = format!("{prefix}{property}");
                    if !present.contains(prefixed.as_str()) {
                        out.push_str(indent);
                        out.push_str(&prefixed);
                        out.push(':');
                        out.push_str(rest);
                        out.push('\n');
                    }
                }
            }

            out.push_str(line);
            out.push('\n');
        }

        if let Some(boundary) = lines.get(end) {
            out.push_str(boundary);
            out.push('\n');
        }

        start = end + 1;
    }

    out
}
