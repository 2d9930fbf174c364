#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod collect;
pub mod config;
pub mod engine;
mod error;
pub mod live;
#[cfg(feature = "logging")]
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod preset;
pub mod server;
pub mod transform;
mod utils;
pub mod watch;

pub use crate::collect::{Filter, GlobPattern, SourceFile};
pub use crate::config::Config;
pub use crate::engine::{Blueprint, Compose, Status, TaskContext, TaskFuture, TaskGraph};
pub use crate::error::*;
pub use crate::live::{LiveReload, ReloadEvent};
pub use crate::output::{Asset, AssetData};
pub use crate::pipeline::Pipeline;
pub use crate::preset::Preset;
pub use crate::server::{DevServer, ServerHandle};
pub use crate::transform::{Chain, ChainOutput, Policy, Transform};
pub use crate::watch::{ReloadKind, WatchReport, Watcher};

/// Which flavour of a pipeline to build. `Develop` keeps output debuggable
/// and adds source maps, `Build` produces the optimized production assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Develop,
    Build,
}
