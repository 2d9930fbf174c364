use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use petgraph::graph::NodeIndex;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::Instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Compose, Executor, Kind, Status, TaskContext, TaskGraph};
use crate::error::{Failure, TaskError};
use crate::utils::{as_overhead, get_style_task};

type Outcome = Result<Status, Failure>;

type OutcomeFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// State of a single [`TaskGraph::run`] call. Every node gets one cell, the
/// first caller to reach it runs it and everyone else waits for the same
/// outcome.
pub(crate) struct Run {
    graph: TaskGraph,
    cells: Mutex<HashMap<NodeIndex, Arc<OnceCell<Outcome>>>>,
}

impl Run {
    pub fn new(graph: TaskGraph) -> Arc<Self> {
        Arc::new(Self {
            graph,
            cells: Mutex::new(HashMap::new()),
        })
    }

    fn cell(&self, index: NodeIndex) -> Arc<OnceCell<Outcome>> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(index)
            .or_default()
            .clone()
    }

    pub fn execute(self: Arc<Self>, index: NodeIndex) -> OutcomeFuture {
        Box::pin(async move {
            let cell = self.cell(index);
            cell.get_or_init(|| self.clone().evaluate(index)).await.clone()
        })
    }

    async fn evaluate(self: Arc<Self>, index: NodeIndex) -> Outcome {
        let node = &self.graph.inner().graph[index];
        let name = node.name.clone();

        match &node.kind {
            Kind::Action { deps, executor } => {
                let deps = deps.clone();
                let executor = executor.clone();

                let upstream = self.clone().all(&name, deps).await?;
                let own = self.invoke(name, executor).await?;

                Ok(upstream.merge(own))
            }
            Kind::Group {
                compose: Compose::Series,
                members,
            } => {
                let members = members.clone();
                let mut status = Status::Done;

                for member in members {
                    status = status.merge(self.clone().execute(member).await?);
                }

                Ok(status)
            }
            Kind::Group {
                compose: Compose::Parallel,
                members,
            } => {
                let members = members.clone();
                self.all(&name, members).await
            }
        }
    }

    /// Run every node concurrently and wait for all of them. The first failure
    /// to arrive is returned, later ones are only logged.
    async fn all(self: Arc<Self>, owner: &Arc<str>, nodes: Vec<NodeIndex>) -> Outcome {
        if let [single] = nodes[..] {
            return self.execute(single).await;
        }

        let mut set = JoinSet::new();
        for node in nodes {
            set.spawn(self.clone().execute(node));
        }

        let mut status = Status::Done;
        let mut failure: Option<Failure> = None;

        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(Failure {
                    task: owner.clone(),
                    error: Arc::new(TaskError::Panic(e.to_string())),
                })
            });

            match outcome {
                Ok(s) => status = status.merge(s),
                Err(err) if failure.is_none() => failure = Some(err),
                Err(err) if failure.as_ref().is_some_and(|f| Arc::ptr_eq(&f.error, &err.error)) => {}
                Err(err) => tracing::error!("{err}"),
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(status),
        }
    }

    async fn invoke(&self, name: Arc<str>, executor: Executor) -> Outcome {
        let span = tracing::info_span!("task", name = %name);
        span.pb_set_style(&get_style_task());
        span.pb_set_message(&name);

        let ctx = TaskContext {
            name: name.clone(),
            graph: self.graph.clone(),
        };

        let s = Instant::now();
        tracing::info!("starting '{name}'");

        let joined = tokio::spawn(async move { executor(ctx).await }.instrument(span)).await;

        let error = match joined {
            Ok(Ok(status)) => {
                match status {
                    Status::Done => tracing::info!("finished '{name}' {}", as_overhead(s)),
                    Status::Degraded => tracing::warn!("finished '{name}' with errors {}", as_overhead(s)),
                }
                return Ok(status);
            }
            Ok(Err(e)) => e,
            Err(e) if e.is_panic() => TaskError::Panic(panic_message(e.into_panic())),
            Err(e) => TaskError::Panic(e.to_string()),
        };

        tracing::error!("'{name}' failed {}", as_overhead(s));

        Err(Failure {
            task: name,
            error: Arc::new(error),
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
