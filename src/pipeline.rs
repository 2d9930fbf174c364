//! File tasks: collect a glob, push the files through a chain and write the
//! result into a directory under the build output.

use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::collect::{Filter, GlobPattern, collect};
use crate::config::Config;
use crate::engine::{Status, TaskContext, TaskFuture};
use crate::error::TaskError;
use crate::output::{Asset, write_assets};
use crate::transform::{Chain, ChainOutput};
use crate::utils::as_overhead;

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    source: GlobPattern,
    chain: Chain,
    dest: Utf8PathBuf,
    incremental: bool,
}

impl Pipeline {
    /// Copy-through from `source` into `dest`, relative to the output
    /// directory. An empty `dest` writes into the output directory itself.
    pub fn new(config: Arc<Config>, source: GlobPattern, dest: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config,
            source,
            chain: Chain::new(),
            dest: dest.into(),
            incremental: false,
        }
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    /// Skip sources whose output is already up to date.
    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    pub fn out_dir(&self) -> Utf8PathBuf {
        let dist = self.config.dist();
        if self.dest.as_str().is_empty() {
            dist
        } else {
            dist.join(&self.dest)
        }
    }

    /// Run the whole pipeline on the current thread.
    pub fn run_blocking(&self) -> Result<Status, TaskError> {
        let s = Instant::now();
        let out = self.out_dir();

        let filter = match self.incremental {
            true => Filter::NewerThan(out.clone()),
            false => Filter::All,
        };

        let files = collect(&self.config.root, &self.source, &filter)?;
        if files.is_empty() {
            tracing::debug!("nothing to do for '{}'", self.source.as_str());
            return Ok(Status::Done);
        }

        let assets = files.iter().map(Asset::read).collect::<Result<Vec<_>, _>>()?;

        match self.chain.run(assets)? {
            ChainOutput::Done(assets) => {
                let count = write_assets(&out, &assets)?;
                tracing::info!("wrote {count} file(s) to {out} {}", as_overhead(s));
                Ok(Status::Done)
            }
            ChainOutput::Degraded(err) => {
                tracing::error!("{err}");
                Ok(Status::Degraded)
            }
        }
    }

    /// Run on the blocking pool, keeping the caller's span.
    pub async fn run(&self) -> Result<Status, TaskError> {
        let this = self.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || span.in_scope(|| this.run_blocking()))
            .await
            .map_err(|e| TaskError::Panic(e.to_string()))?
    }

    /// Wrap the pipeline as a task executor.
    pub fn into_task(self) -> impl Fn(TaskContext) -> TaskFuture + Send + Sync + 'static {
        let this = Arc::new(self);
        move |_: TaskContext| -> TaskFuture {
            let this = this.clone();
            Box::pin(async move { this.run().await })
        }
    }
}
