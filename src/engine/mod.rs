//! The task graph: named tasks, their dependencies and the compositions that
//! group them.
//!
//! A [`Blueprint`] collects registrations and is turned into an immutable
//! [`TaskGraph`] by [`Blueprint::finish`]. The graph is cheap to clone and is
//! what executors receive through their [`TaskContext`].

mod diagnostics;
mod run;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::{ConfigError, RunError, TaskError};

/// How a task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Done,
    /// Finished, but some step logged an error and skipped its output.
    Degraded,
}

impl Status {
    /// Combine the status of two parts of the same run.
    pub fn merge(self, other: Status) -> Status {
        match (self, other) {
            (Status::Done, Status::Done) => Status::Done,
            _ => Status::Degraded,
        }
    }

    pub fn is_degraded(self) -> bool {
        self == Status::Degraded
    }
}

/// How the members of a group are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compose {
    /// One after another, the first failure skips the rest.
    Series,
    /// All at once; members that already started are never cancelled.
    Parallel,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<Status, TaskError>> + Send>>;

pub(crate) type Executor = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// Handed to every executor when it is invoked.
#[derive(Clone)]
pub struct TaskContext {
    name: Arc<str>,
    graph: TaskGraph,
}

impl TaskContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The graph this task belongs to, for executors that trigger other
    /// tasks (the watcher does).
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }
}

pub(crate) enum Kind {
    Action { deps: Vec<NodeIndex>, executor: Executor },
    Group { compose: Compose, members: Vec<NodeIndex> },
}

pub(crate) struct Node {
    pub name: Arc<str>,
    pub anonymous: bool,
    pub kind: Kind,
}

enum Pending {
    Action { deps: Vec<String>, executor: Executor },
    Group { compose: Compose, members: Vec<String> },
}

struct Entry {
    name: Arc<str>,
    anonymous: bool,
    pending: Pending,
}

/// Builder for a [`TaskGraph`].
///
/// Names are checked for uniqueness on registration. References to other
/// tasks may point forward and are only resolved in [`Blueprint::finish`].
#[derive(Default)]
pub struct Blueprint {
    entries: Vec<Entry>,
    index: HashMap<Arc<str>, usize>,
    anonymous: usize,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: Arc<str>, anonymous: bool, pending: Pending) -> Result<(), ConfigError> {
        if self.index.contains_key(&name) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }

        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            name,
            anonymous,
            pending,
        });

        Ok(())
    }

    /// Register a task that runs `executor` after every task in `deps`
    /// has completed. The dependencies run concurrently with each other.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        deps: &[&str],
        executor: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Status, TaskError>> + Send + 'static,
    {
        let executor: Executor = Arc::new(move |ctx: TaskContext| -> TaskFuture { Box::pin(executor(ctx)) });
        let deps = deps.iter().map(|dep| dep.to_string()).collect();

        self.push(Arc::from(name.into()), false, Pending::Action { deps, executor })
    }

    /// Register a named group of tasks.
    pub fn group(
        &mut self,
        name: impl Into<String>,
        compose: Compose,
        members: &[&str],
    ) -> Result<(), ConfigError> {
        let members = members.iter().map(|member| member.to_string()).collect();
        self.push(Arc::from(name.into()), false, Pending::Group { compose, members })
    }

    /// Create an anonymous group and return the generated name it can be
    /// referenced by.
    pub fn compose(&mut self, compose: Compose, members: &[&str]) -> String {
        let prefix = match compose {
            Compose::Series => "series",
            Compose::Parallel => "parallel",
        };

        let name = loop {
            self.anonymous += 1;
            let name = format!("{prefix}#{}", self.anonymous);
            if !self.index.contains_key(name.as_str()) {
                break name;
            }
        };

        let members = members.iter().map(|member| member.to_string()).collect();
        let pending = Pending::Group { compose, members };

        // the name was just checked to be free
        let _ = self.push(Arc::from(name.as_str()), true, pending);
        name
    }

    pub fn series(&mut self, members: &[&str]) -> String {
        self.compose(Compose::Series, members)
    }

    pub fn parallel(&mut self, members: &[&str]) -> String {
        self.compose(Compose::Parallel, members)
    }

    /// Resolve every reference and freeze the graph.
    pub fn finish(self) -> Result<TaskGraph, ConfigError> {
        let Self { entries, index, .. } = self;

        let resolve = |task: &Arc<str>, names: &[String]| -> Result<Vec<NodeIndex>, ConfigError> {
            names
                .iter()
                .map(|name| {
                    index
                        .get(name.as_str())
                        .map(|&i| NodeIndex::new(i))
                        .ok_or_else(|| ConfigError::UnknownDependency {
                            task: task.to_string(),
                            dependency: name.clone(),
                        })
                })
                .collect()
        };

        let mut graph = Graph::with_capacity(entries.len(), entries.len());
        let mut edges = Vec::new();

        for entry in entries {
            let kind = match entry.pending {
                Pending::Action { deps, executor } => Kind::Action {
                    deps: resolve(&entry.name, &deps)?,
                    executor,
                },
                Pending::Group { compose, members } => Kind::Group {
                    compose,
                    members: resolve(&entry.name, &members)?,
                },
            };

            let upstream = match &kind {
                Kind::Action { deps, .. } => deps.clone(),
                Kind::Group { members, .. } => members.clone(),
            };

            let node = graph.add_node(Node {
                name: entry.name,
                anonymous: entry.anonymous,
                kind,
            });

            edges.extend(upstream.into_iter().map(|dep| (dep, node)));
        }

        for (dep, node) in edges {
            graph.add_edge(dep, node, ());
        }

        let names = graph
            .node_indices()
            .map(|index| (graph[index].name.clone(), index))
            .collect();

        Ok(TaskGraph(Arc::new(Inner { graph, names })))
    }
}

pub(crate) struct Inner {
    pub graph: Graph<Node, ()>,
    pub names: HashMap<Arc<str>, NodeIndex>,
}

/// An immutable set of tasks. Clones share the same graph.
#[derive(Clone)]
pub struct TaskGraph(Arc<Inner>);

impl TaskGraph {
    fn index(&self, name: &str) -> Result<NodeIndex, ConfigError> {
        self.0
            .names
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.names.contains_key(name)
    }

    /// Registered task names in registration order, anonymous groups left out.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0
            .graph
            .node_weights()
            .filter(|node| !node.anonymous)
            .map(|node| &*node.name)
    }

    fn order(&self) -> Result<Vec<NodeIndex>, ConfigError> {
        petgraph::algo::toposort(&self.0.graph, None)
            .map_err(|cycle| ConfigError::Cycle(self.0.graph[cycle.node_id()].name.to_string()))
    }

    /// Fail if any dependency cycle exists anywhere in the graph.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.order().map(|_| ())
    }

    /// Every task a run of `name` would touch, in the order a run reaches
    /// them: dependencies before dependents, series members one after
    /// another.
    pub fn plan(&self, name: &str) -> Result<Vec<Arc<str>>, ConfigError> {
        let start = self.index(name)?;
        self.check()?;

        let graph = &self.0.graph;
        let mut visited = vec![false; graph.node_count()];
        let mut order = Vec::new();
        visit(graph, start, &mut visited, &mut order);

        Ok(order)
    }

    /// Run `name` together with everything it depends on. Each task runs at
    /// most once per call, however many paths lead to it.
    pub async fn run(&self, name: &str) -> Result<Status, RunError> {
        let start = self.index(name)?;
        self.check()?;

        let status = run::Run::new(self.clone()).execute(start).await?;
        Ok(status)
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.0
    }
}

/// Post-order walk over the declared structure. The graph is acyclic here,
/// so every node lands after everything it waits for.
fn visit(graph: &Graph<Node, ()>, index: NodeIndex, visited: &mut [bool], order: &mut Vec<Arc<str>>) {
    if visited[index.index()] {
        return;
    }
    visited[index.index()] = true;

    let upstream = match &graph[index].kind {
        Kind::Action { deps, .. } => deps,
        Kind::Group { members, .. } => members,
    };

    for &next in upstream {
        visit(graph, next, visited, order);
    }

    order.push(graph[index].name.clone());
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
