//! Transform steps and the chains that run them.
//!
//! A [`Transform`] takes the whole in-flight file set and returns a new one.
//! Steps are bound into a [`Chain`] at declaration time and always run in
//! that order, each step consuming the previous step's output.

pub mod image;
pub mod markup;
pub mod script;
pub mod style;

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::TransformError;
use crate::output::{Asset, AssetData};

/// What a chain does when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Fail the owning task.
    Fatal,
    /// Log the error, drop the file set and mark the run degraded.
    Degrade,
}

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError>;

    fn policy(&self) -> Policy {
        Policy::Fatal
    }
}

/// Result of running a chain to completion.
#[derive(Debug)]
pub enum ChainOutput {
    Done(Vec<Asset>),
    /// A step with [`Policy::Degrade`] failed, nothing should be written.
    Degraded(TransformError),
}

/// An ordered sequence of transform steps.
#[derive(Clone, Default)]
pub struct Chain {
    steps: Vec<Arc<dyn Transform>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: impl Transform + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Append a step only when `cond` holds.
    pub fn then_if(self, cond: bool, step: impl Transform + 'static) -> Self {
        if cond { self.then(step) } else { self }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn run(&self, mut assets: Vec<Asset>) -> Result<ChainOutput, TransformError> {
        for step in &self.steps {
            tracing::debug!(step = step.name(), files = assets.len(), "applying step");

            assets = match step.apply(assets) {
                Ok(assets) => assets,
                Err(err) => match step.policy() {
                    Policy::Fatal => return Err(err),
                    Policy::Degrade => return Ok(ChainOutput::Degraded(err)),
                },
            };
        }

        Ok(ChainOutput::Done(assets))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Join every asset into a single file, in collection order.
#[derive(Debug, Clone)]
pub struct Concat {
    file_name: String,
}

impl Concat {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl Transform for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        if assets.is_empty() {
            return Ok(assets);
        }

        let mut text = String::new();
        let mut sources = Vec::new();

        for asset in assets {
            let Some(part) = asset.as_text() else {
                return Err(TransformError::new(self.name(), anyhow::anyhow!("not a text file"))
                    .on(asset.origin()));
            };

            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(part);
            sources.extend(asset.sources);
        }

        Ok(vec![Asset::text(self.file_name.as_str(), text).with_sources(sources)])
    }
}

/// Replace the file name of every asset, keeping its directory.
#[derive(Debug, Clone)]
pub struct Rename {
    file_name: String,
}

impl Rename {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl Transform for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        for asset in &mut assets {
            asset.path.set_file_name(&self.file_name);
        }
        Ok(assets)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapV3<'a> {
    version: u8,
    file: &'a str,
    sources: Vec<String>,
    names: [&'a str; 0],
    mappings: &'a str,
}

/// Emit an adjacent `.map` file for every text asset and link it from the
/// asset with a `sourceMappingURL` comment.
///
/// The map names the files the asset was built from. Neither the stylesheet
/// compiler nor plain concatenation exposes segment mappings, so `mappings`
/// stays empty.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    root: Option<Utf8PathBuf>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report sources relative to this directory.
    pub fn relative_to(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn source_name(&self, path: &Utf8Path) -> String {
        match &self.root {
            Some(root) => path.strip_prefix(root).unwrap_or(path).to_string(),
            None => path.to_string(),
        }
    }
}

impl Transform for SourceMap {
    fn name(&self) -> &'static str {
        "sourcemap"
    }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        let mut result = Vec::with_capacity(assets.len() * 2);

        for mut asset in assets {
            let Some(file) = asset.path.file_name().map(str::to_string) else {
                result.push(asset);
                continue;
            };

            let AssetData::Utf8(text) = &mut asset.data else {
                result.push(asset);
                continue;
            };

            let map = SourceMapV3 {
                version: 3,
                file: &file,
                sources: asset.sources.iter().map(|s| self.source_name(s)).collect(),
                names: [],
                mappings: "",
            };

            let json = serde_json::to_string(&map)
                .map_err(|e| TransformError::new("sourcemap", e).on(asset.path.clone()))?;

            let map_name = format!("{file}.map");
            let comment = match asset.path.extension() {
                Some("js") => format!("//# sourceMappingURL={map_name}"),
                _ => format!("/*# sourceMappingURL={map_name} */"),
            };

            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&comment);
            text.push('\n');

            let map_path = asset.path.with_file_name(&map_name);
            let map_asset = Asset::text(map_path, json).with_sources(asset.sources.clone());

            result.push(asset);
            result.push(map_asset);
        }

        Ok(result)
    }
}
