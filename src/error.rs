use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Problems with the shape of the task graph or the configuration. These are
/// always fatal and are raised before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task '{0}' is registered more than once")]
    Duplicate(String),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Dependency cycle detected at task '{0}'")]
    Cycle(String),

    #[error("Dev server is already running")]
    ServerStarted,

    #[error("Missing required path '{0}'")]
    MissingPath(&'static str),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Couldn't read config file '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse config file '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Couldn't compile glob pattern '{0}'.\n{1}")]
    Pattern(String, glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Pattern '{0}' did not match any files")]
    NoMatches(String),

    #[error("Couldn't read '{path}'.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// A single transform step failed, optionally on a specific file.
#[derive(Debug)]
pub struct TransformError {
    pub step: &'static str,
    pub file: Option<Utf8PathBuf>,
    pub source: anyhow::Error,
}

impl TransformError {
    pub fn new(step: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self {
            step,
            file: None,
            source: source.into(),
        }
    }

    pub fn on(mut self, file: impl Into<Utf8PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "step '{}' failed on '{}':\n{:#}", self.step, file, self.source),
            None => write!(f, "step '{}' failed:\n{:#}", self.step, self.source),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Couldn't write '{path}'.\n{source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Error while clearing the dist directory:\n{0}")]
    Clean(#[from] CleanError),

    #[error(transparent)]
    Server(ServerError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Task panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Couldn't remove '{0}'.\n{1}")]
    Remove(Utf8PathBuf, std::io::Error),

    #[error("Couldn't create '{0}'.\n{1}")]
    Create(Utf8PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    /// Starting a server twice is a mistake in the task setup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Couldn't bind port {port}.\n{source}")]
    Bind { port: u16, source: std::io::Error },
}

impl From<ServerError> for TaskError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Config(e) => TaskError::Config(e),
            err => TaskError::Server(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watch path '{0}'.\n{1}")]
    Resolve(String, anyhow::Error),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),
}

/// The root cause of a failed run: the task whose executor failed and the
/// error it returned. Dependents propagate the same value unchanged.
#[derive(Debug, Clone)]
pub struct Failure {
    pub task: Arc<str>,
    pub error: Arc<TaskError>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task '{}':\n{}", self.task, self.error)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid task graph.\n{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Failed(#[from] Failure),
}
