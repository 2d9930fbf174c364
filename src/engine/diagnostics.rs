use std::fmt::{Display, Formatter};

use crate::engine::{Compose, Kind, TaskGraph};

/// Renders the task graph as a Mermaid diagram.
///
/// * **Rectangles**: tasks with an executor
/// * **Rounded**: series groups, edges numbered in run order
/// * **Hexagons**: parallel groups
impl Display for TaskGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let graph = &self.inner().graph;

        writeln!(f, "graph LR")?;

        for index in graph.node_indices() {
            let node = &graph[index];
            let name = node.name.replace('"', "#quot;");
            let id = index.index();

            match &node.kind {
                Kind::Action { .. } => writeln!(f, "    {id}[\"{name}\"]")?,
                Kind::Group {
                    compose: Compose::Series,
                    ..
                } => writeln!(f, "    {id}(\"{name}\")")?,
                Kind::Group {
                    compose: Compose::Parallel,
                    ..
                } => writeln!(f, "    {id}{{{{\"{name}\"}}}}")?,
            }
        }

        for index in graph.node_indices() {
            let id = index.index();

            match &graph[index].kind {
                Kind::Action { deps, .. } => {
                    for dep in deps {
                        writeln!(f, "    {} --> {id}", dep.index())?;
                    }
                }
                Kind::Group {
                    compose: Compose::Series,
                    members,
                } => {
                    for (i, member) in members.iter().enumerate() {
                        writeln!(f, "    {} -- \"{}\" --> {id}", member.index(), i + 1)?;
                    }
                }
                Kind::Group {
                    compose: Compose::Parallel,
                    members,
                } => {
                    for member in members {
                        writeln!(f, "    {} --> {id}", member.index())?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Blueprint, Status};

    #[test]
    fn renders_mermaid() {
        let mut bp = Blueprint::new();
        bp.register("clean", &[], |_| async { Ok(Status::Done) }).unwrap();
        bp.register("style", &[], |_| async { Ok(Status::Done) }).unwrap();
        bp.register("html", &["clean"], |_| async { Ok(Status::Done) }).unwrap();
        let assets = bp.parallel(&["style", "html"]);
        bp.group("build", crate::engine::Compose::Series, &["clean", assets.as_str()])
            .unwrap();

        let text = bp.finish().unwrap().to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("    0[\"clean\"]\n"));
        assert!(text.contains("    3{{\"parallel#1\"}}\n"));
        assert!(text.contains("    4(\"build\")\n"));
        assert!(text.contains("    0 --> 2\n"));
        assert!(text.contains("    3 -- \"2\" --> 4\n"));
    }
}
