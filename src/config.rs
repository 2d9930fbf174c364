//! Static configuration shared by every task.
//!
//! A [`Config`] is read once at startup, validated, and then handed out as an
//! `Arc<Config>`; nothing mutates it afterwards. Every path role is relative
//! to [`Config::root`], so the same configuration can describe a project
//! that is not the current working directory.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// File name looked up when no `--config` is given.
pub const DEFAULT_CONFIG: &str = "kumitate.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root, every other path is resolved against it.
    pub root: Utf8PathBuf,
    /// HTTP port of the dev server.
    pub port: u16,
    /// Preferred port of the live-reload websocket.
    pub live_port: u16,
    pub paths: Paths,
    pub style: StyleOptions,
    pub script: ScriptOptions,
    pub images: ImageOptions,
}

/// Logical path roles. Entries ending in `_watch` are the globs the watcher
/// binds, the rest are the globs the tasks collect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub src: Utf8PathBuf,
    pub dist: Utf8PathBuf,
    pub html: String,
    pub scss: String,
    pub scss_watch: String,
    pub js: String,
    pub js_watch: String,
    pub images: String,
    pub fonts: String,
    pub resources: String,
    pub deploy: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StyleOptions {
    /// Name of the single stylesheet the style pipeline concatenates into.
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bundler {
    /// Resolve the module graph with the `esbuild` binary.
    Esbuild,
    /// Plain concatenation of every matched script.
    Concat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptOptions {
    pub bundler: Bundler,
    /// Fixed basename of the bundled script.
    pub output: String,
    /// Down-level target for production builds, `None` skips the step.
    pub target: Option<String>,
    pub minify: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageOptions {
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            port: 4000,
            live_port: 35729,
            paths: Paths::default(),
            style: StyleOptions::default(),
            script: ScriptOptions::default(),
            images: ImageOptions::default(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            src: "src".into(),
            dist: "dist".into(),
            html: "src/**/*.html".into(),
            scss: "src/scss/main.scss".into(),
            scss_watch: "src/scss/**/*.scss".into(),
            js: "src/js/index.js".into(),
            js_watch: "src/js/**/*.js".into(),
            images: "src/images/**/*".into(),
            fonts: "src/fonts/**/*".into(),
            resources: "resources/**/*".into(),
            deploy: None,
        }
    }
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            output: "main.css".into(),
        }
    }
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            bundler: Bundler::Esbuild,
            output: "app.js".into(),
            target: Some("es2015".into()),
            minify: true,
        }
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

impl Config {
    /// Load the configuration file. When `path` is `None` the default file is
    /// used if it exists, otherwise every option keeps its default value.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Utf8PathBuf::from(DEFAULT_CONFIG), false),
        };

        if !explicit && !path.exists() {
            tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG);
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let config = Self::parse(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Check the required path roles before any task gets to run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = &self.paths;

        if paths.src.as_str().is_empty() {
            return Err(ConfigError::MissingPath("paths.src"));
        }
        if paths.dist.as_str().is_empty() {
            return Err(ConfigError::MissingPath("paths.dist"));
        }
        if paths.scss.is_empty() {
            return Err(ConfigError::MissingPath("paths.scss"));
        }
        if paths.js.is_empty() {
            return Err(ConfigError::MissingPath("paths.js"));
        }

        let dist = paths.dist.as_str().trim_end_matches('/');
        if dist == "." || dist == paths.src.as_str().trim_end_matches('/') {
            return Err(ConfigError::Invalid {
                key: "paths.dist",
                reason: "the output directory must not be the project root or the sources".into(),
            });
        }

        if !(1..=100).contains(&self.images.jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "images.jpeg_quality",
                reason: format!("{} is outside 1..=100", self.images.jpeg_quality),
            });
        }

        for name in [&self.style.output, &self.script.output] {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::Invalid {
                    key: "output",
                    reason: format!("'{name}' is not a plain file name"),
                });
            }
        }

        Ok(())
    }

    /// Resolve a path role against the project root.
    pub fn resolve(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        crate::collect::resolve(&self.root, path)
    }

    /// The build output directory.
    pub fn dist(&self) -> Utf8PathBuf {
        self.resolve(&self.paths.dist)
    }
}
