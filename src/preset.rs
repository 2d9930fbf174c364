//! Ready-made task graphs.
//!
//! [`Preset::Standard`] declares the develop/build split with a dev server,
//! [`Preset::Classic`] the flat legacy layout: one task per asset class, a
//! deploy copy and a plain watcher.

use std::sync::Arc;

use clap::ValueEnum;

use crate::Mode;
use crate::collect::GlobPattern;
use crate::config::{Bundler, Config};
use crate::engine::{Blueprint, Compose, Status, TaskContext, TaskFuture, TaskGraph};
use crate::error::{ConfigError, TaskError};
use crate::live::LiveReload;
use crate::output::{clean_dir, mirror_dir};
use crate::pipeline::Pipeline;
use crate::server::DevServer;
use crate::transform::image::OptimizeImages;
use crate::transform::markup::MinifyHtml;
use crate::transform::script::Esbuild;
use crate::transform::style::{CompileScss, MinifyCss, Prefix};
use crate::transform::{Chain, Concat, Rename, SourceMap};
use crate::watch::{ReloadKind, Watcher};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    #[default]
    Standard,
    Classic,
}

impl Preset {
    pub fn blueprint(self, config: Arc<Config>) -> Result<Blueprint, ConfigError> {
        match self {
            Preset::Standard => standard(config),
            Preset::Classic => classic(config),
        }
    }

    pub fn graph(self, config: Arc<Config>) -> Result<TaskGraph, ConfigError> {
        self.blueprint(config)?.finish()
    }
}

/// Stylesheet chain. Develop adds a source map next to the bundle.
pub fn style_chain(config: &Config, mode: Mode) -> Chain {
    let compile = CompileScss::new().load_path(config.resolve(&config.paths.src));

    Chain::new()
        .then(compile)
        .then(Prefix)
        .then(MinifyCss)
        .then(Concat::new(&config.style.output))
        .then_if(mode == Mode::Develop, SourceMap::new().relative_to(config.root.clone()))
}

/// Script source and chain for the configured bundler.
pub fn script_pipeline(config: &Config, mode: Mode) -> (GlobPattern, Chain) {
    let script = &config.script;
    let build = mode == Mode::Build;

    match script.bundler {
        Bundler::Esbuild => {
            let bundle = match mode {
                Mode::Develop => Esbuild::bundle_with_sourcemap(),
                Mode::Build => Esbuild::bundle(),
            };

            let chain = Chain::new()
                .then(bundle)
                .then_if(build && script.target.is_some(), transpile(script.target.as_deref()))
                .then_if(build && script.minify, Esbuild::minify())
                .then(Rename::new(&script.output));

            (GlobPattern::new(&config.paths.js).required(), chain)
        }
        Bundler::Concat => {
            let chain = Chain::new()
                .then(Concat::new(&script.output))
                .then_if(build && script.target.is_some(), transpile(script.target.as_deref()))
                .then_if(build && script.minify, Esbuild::minify())
                .then_if(!build, SourceMap::new().relative_to(config.root.clone()));

            (GlobPattern::new(&config.paths.js_watch), chain)
        }
    }
}

fn transpile(target: Option<&str>) -> Esbuild {
    Esbuild::transpile(target.unwrap_or("esnext"))
}

fn clean_task(config: Arc<Config>) -> impl Fn(TaskContext) -> TaskFuture + Send + Sync + 'static {
    move |_: TaskContext| -> TaskFuture {
        let dist = config.dist();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || clean_dir(&dist))
                .await
                .map_err(|e| TaskError::Panic(e.to_string()))??;
            Ok::<_, TaskError>(Status::Done)
        })
    }
}

fn standard(config: Arc<Config>) -> Result<Blueprint, ConfigError> {
    let paths = &config.paths;
    let live = LiveReload::new();
    let server = Arc::new(DevServer::new(config.dist(), config.port, config.live_port, live.clone()));

    let html = GlobPattern::new(&paths.html).base(&paths.src);
    let style = GlobPattern::new(&paths.scss).required();
    let images = GlobPattern::new(&paths.images);
    let fonts = GlobPattern::new(&paths.fonts);

    let mut bp = Blueprint::new();

    bp.register("clean", &[], clean_task(config.clone()))?;

    // development
    bp.register(
        "compile:html",
        &[],
        Pipeline::new(config.clone(), html.clone(), "").into_task(),
    )?;
    bp.register(
        "compile:style",
        &[],
        Pipeline::new(config.clone(), style.clone(), "css")
            .chain(style_chain(&config, Mode::Develop))
            .into_task(),
    )?;
    let (scripts, chain) = script_pipeline(&config, Mode::Develop);
    bp.register(
        "compile:js",
        &[],
        Pipeline::new(config.clone(), scripts, "js").chain(chain).into_task(),
    )?;
    bp.register(
        "compile:images",
        &[],
        Pipeline::new(config.clone(), images.clone(), "images")
            .incremental()
            .into_task(),
    )?;
    bp.register(
        "compile:fonts",
        &[],
        Pipeline::new(config.clone(), fonts.clone(), "fonts")
            .incremental()
            .into_task(),
    )?;
    bp.group(
        "compile",
        Compose::Parallel,
        &["compile:html", "compile:style", "compile:js", "compile:images", "compile:fonts"],
    )?;

    // production
    bp.register(
        "build:html",
        &[],
        Pipeline::new(config.clone(), html, "")
            .chain(Chain::new().then(MinifyHtml))
            .into_task(),
    )?;
    bp.register(
        "build:style",
        &[],
        Pipeline::new(config.clone(), style, "css")
            .chain(style_chain(&config, Mode::Build))
            .into_task(),
    )?;
    let (scripts, chain) = script_pipeline(&config, Mode::Build);
    bp.register(
        "build:js",
        &[],
        Pipeline::new(config.clone(), scripts, "js").chain(chain).into_task(),
    )?;
    bp.register(
        "build:images",
        &[],
        Pipeline::new(config.clone(), images, "images")
            .chain(Chain::new().then(OptimizeImages::new(config.images.jpeg_quality)))
            .incremental()
            .into_task(),
    )?;
    bp.register(
        "build:fonts",
        &[],
        Pipeline::new(config.clone(), fonts, "fonts")
            .incremental()
            .into_task(),
    )?;
    let assets = bp.parallel(&["build:html", "build:style", "build:js", "build:images", "build:fonts"]);
    bp.group("build", Compose::Series, &["clean", assets.as_str()])?;

    // serving
    {
        let server = server.clone();
        bp.register("serve:start", &[], move |_| {
            let server = server.clone();
            async move {
                let handle = server.start().await?;
                tracing::debug!("live reload on port {}", handle.live_port);
                Ok::<_, TaskError>(Status::Done)
            }
        })?;
    }

    {
        let config = config.clone();
        bp.register("watch", &[], move |ctx: TaskContext| {
            let config = config.clone();
            let live = live.clone();
            async move {
                let paths = &config.paths;
                let mut watcher = Watcher::new(ctx.graph().clone(), &config.root).live_reload(live);

                for (glob, task, reload) in [
                    (&paths.html, "compile:html", ReloadKind::Full),
                    (&paths.scss_watch, "compile:style", ReloadKind::Style),
                    (&paths.js_watch, "compile:js", ReloadKind::Full),
                    (&paths.images, "compile:images", ReloadKind::Full),
                    (&paths.fonts, "compile:fonts", ReloadKind::Full),
                ] {
                    if let Err(e) = watcher.bind(glob, task, reload) {
                        tracing::warn!("not watching '{glob}': {e}");
                    }
                }

                watch_until_interrupted(watcher).await
            }
        })?;
    }

    bp.group("serve", Compose::Series, &["serve:start", "watch"])?;
    bp.group("default", Compose::Series, &["compile", "serve"])?;

    Ok(bp)
}

async fn watch_until_interrupted(watcher: Watcher) -> Result<Status, TaskError> {
    tokio::select! {
        result = watcher.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, stopping watch"),
    }

    Ok(Status::Done)
}

fn classic(config: Arc<Config>) -> Result<Blueprint, ConfigError> {
    let paths = &config.paths;
    let src = paths.src.as_str().trim_end_matches('/');

    let sass = format!("{src}/**/*.scss");
    let html = format!("{src}/**/*.html");
    let scripts = format!("{src}/**/*.js");

    let mut bp = Blueprint::new();

    bp.register(
        "sass",
        &[],
        Pipeline::new(config.clone(), GlobPattern::new(&sass), "")
            .chain(
                Chain::new()
                    .then(CompileScss::new().load_path(config.resolve(&paths.src)))
                    .then(Prefix)
                    .then(MinifyCss)
                    .then(Concat::new("style.css")),
            )
            .into_task(),
    )?;
    bp.register(
        "html",
        &[],
        Pipeline::new(config.clone(), GlobPattern::new(&html).base(&paths.src), "").into_task(),
    )?;
    bp.register(
        "scripts",
        &[],
        Pipeline::new(config.clone(), GlobPattern::new(&scripts), "")
            .chain(Chain::new().then(Concat::new("scripts.js")))
            .into_task(),
    )?;
    bp.register(
        "resources",
        &[],
        Pipeline::new(config.clone(), GlobPattern::new(&paths.resources).base(""), "").into_task(),
    )?;

    {
        let config = config.clone();
        bp.register("deploy", &[], move |_| {
            let config = config.clone();
            async move {
                let Some(target) = &config.paths.deploy else {
                    return Err(TaskError::from(ConfigError::MissingPath("paths.deploy")));
                };

                let dist = config.dist();
                let target = config.resolve(target);

                let count = tokio::task::spawn_blocking({
                    let target = target.clone();
                    move || mirror_dir(&dist, &target)
                })
                .await
                .map_err(|e| TaskError::Panic(e.to_string()))?
                .map_err(|source| TaskError::Write {
                    path: target.clone(),
                    source,
                })?;

                tracing::info!("deployed {count} file(s) to {target}");
                Ok::<_, TaskError>(Status::Done)
            }
        })?;
    }

    {
        let config = config.clone();
        bp.register("watch", &[], move |ctx: TaskContext| {
            let config = config.clone();
            let (sass, html, scripts) = (sass.clone(), html.clone(), scripts.clone());
            async move {
                let mut watcher = Watcher::new(ctx.graph().clone(), &config.root);

                for (glob, task) in [
                    (sass.as_str(), "sass"),
                    (html.as_str(), "html"),
                    (config.paths.resources.as_str(), "resources"),
                    (scripts.as_str(), "scripts"),
                ] {
                    if let Err(e) = watcher.bind(glob, task, ReloadKind::Full) {
                        tracing::warn!("not watching '{glob}': {e}");
                    }
                }

                watch_until_interrupted(watcher).await
            }
        })?;
    }

    bp.register("default", &["html", "sass", "scripts", "resources"], |_| async {
        Ok::<_, TaskError>(Status::Done)
    })?;

    Ok(bp)
}
